//! Client configuration

use crate::async_utils::RetryConfig;
use crate::error::{ErrorContext, PerfhubError, PerfhubResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub session: SessionConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

/// REST endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every REST path is joined onto
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_ms: 15_000,
        }
    }
}

/// Realtime channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket origin; the token path `/ws/{token}` is appended
    pub url: String,
    /// Interval between keep-alive pings, `0` disables them
    pub ping_interval_secs: u64,
    /// Capacity of the ordered event queue handed to the relay
    pub event_buffer: usize,
    /// Reconnect policy
    pub reconnect: RetryConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000".to_string(),
            ping_interval_secs: 30,
            event_buffer: 256,
            reconnect: RetryConfig {
                max_attempts: 10,
                initial_delay_ms: 1_000,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }
}

/// Session manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Route the navigator is sent to on logout or expiry
    pub login_route: String,
    /// Capability token that satisfies every permission check
    pub override_permission: String,
    /// How long `logging_out` stays raised after logout
    pub logout_settle_ms: u64,
    /// Upper bound for the detached remote logout call
    pub remote_logout_timeout_ms: u64,
    /// Treat credentials as expired this many seconds early
    pub expiry_leeway_secs: i64,
    /// Where the file credential store keeps its data
    pub credential_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_route: "/login".to_string(),
            override_permission: "system_admin".to_string(),
            logout_settle_ms: 500,
            remote_logout_timeout_ms: 5_000,
            expiry_leeway_secs: 0,
            credential_path: None,
        }
    }
}

/// Notification relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Fetch the first page as soon as the channel connects
    pub fetch_on_connect: bool,
    /// Page size of that initial fetch
    pub page_size: u32,
    /// Backoff for the initial fetch; only recoverable failures are retried
    pub fetch_retry: RetryConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            fetch_on_connect: true,
            page_size: 50,
            fetch_retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1_000,
                max_delay_ms: 10_000,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PerfhubResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PerfhubError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: ClientConfig = toml::from_str(&content).map_err(|e| PerfhubError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Load the file when it exists, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> PerfhubResult<Self> {
        let mut config = match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> PerfhubResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| PerfhubError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| PerfhubError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Override selected values from `PERFHUB_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PERFHUB_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(url) = std::env::var("PERFHUB_WS_URL") {
            self.realtime.url = url;
        }
        if let Ok(level) = std::env::var("PERFHUB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(path) = std::env::var("PERFHUB_CREDENTIAL_PATH") {
            self.session.credential_path = Some(path);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> PerfhubResult<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(PerfhubError::Config {
                message: format!("api.base_url must be an http(s) URL: {}", self.api.base_url),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.base_url, e.g. http://localhost:8000/api"),
            });
        }

        if !self.realtime.url.starts_with("ws://") && !self.realtime.url.starts_with("wss://") {
            return Err(PerfhubError::Config {
                message: format!("realtime.url must be a ws(s) URL: {}", self.realtime.url),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set realtime.url, e.g. ws://localhost:8000"),
            });
        }

        if self.realtime.event_buffer == 0 {
            return Err(PerfhubError::Config {
                message: "realtime.event_buffer must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set realtime.event_buffer to a positive value"),
            });
        }

        if !self.session.login_route.starts_with('/') {
            return Err(PerfhubError::Config {
                message: "session.login_route must be an absolute route".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Use a route such as /login"),
            });
        }

        if self.session.override_permission.trim().is_empty() {
            return Err(PerfhubError::Config {
                message: "session.override_permission must not be empty".to_string(),
                source: None,
                context: ErrorContext::new("config").with_operation("validate"),
            });
        }

        Ok(())
    }
}
