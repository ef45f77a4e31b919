//! Unified error handling system
//!
//! Provides the client error taxonomy with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type PerfhubResult<T> = Result<T, PerfhubError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the PerfHub client
#[derive(Error, Debug)]
pub enum PerfhubError {
    /// Rejected credentials at login; the caller decides how to present it
    #[error("Authentication error: {message}")]
    Auth {
        message: String,
        context: ErrorContext,
    },

    /// 401-class response or a locally expired credential
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        context: ErrorContext,
    },

    #[error("Transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    /// Notification CRUD failure
    #[error("Request error: {message}")]
    Request {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Realtime channel error: {message}")]
    Channel {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl PerfhubError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            PerfhubError::Auth { context, .. } => Some(context),
            PerfhubError::Unauthorized { context, .. } => Some(context),
            PerfhubError::Transient { context, .. } => Some(context),
            PerfhubError::Request { context, .. } => Some(context),
            PerfhubError::Storage { context, .. } => Some(context),
            PerfhubError::Config { context, .. } => Some(context),
            PerfhubError::Channel { context, .. } => Some(context),
            PerfhubError::Timeout { context, .. } => Some(context),
            PerfhubError::Internal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether this error must tear the session down
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PerfhubError::Unauthorized { .. })
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            PerfhubError::Transient { .. } => true,
            PerfhubError::Channel { .. } => true,
            PerfhubError::Timeout { .. } => true,
            PerfhubError::Request { status, .. } => status.map_or(true, |s| s >= 500),
            PerfhubError::Auth { .. } => false,
            PerfhubError::Unauthorized { .. } => false,
            PerfhubError::Config { .. } => false,
            _ => false,
        }
    }

    /// Get retry delay in milliseconds for recoverable errors
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            PerfhubError::Transient { .. } => Some(1000),
            PerfhubError::Channel { .. } => Some(1000),
            PerfhubError::Timeout { .. } => Some(2000),
            PerfhubError::Request { .. } if self.is_recoverable() => Some(1000),
            _ => None,
        }
    }

    /// HTTP status attached to the failure, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            PerfhubError::Request { status, .. } => *status,
            PerfhubError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            PerfhubError::Internal { .. } | PerfhubError::Storage { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal error occurred"
                );
            }
            PerfhubError::Config { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration error"
                );
            }
            PerfhubError::Transient { .. }
            | PerfhubError::Channel { .. }
            | PerfhubError::Timeout { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Transient failure (may be recoverable)"
                );
            }
            PerfhubError::Auth { .. } | PerfhubError::Unauthorized { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Authentication failure"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! auth_error {
    ($msg:expr, $component:expr) => {
        $crate::PerfhubError::Auth {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the username and password"),
        }
    };
}

#[macro_export]
macro_rules! unauthorized_error {
    ($msg:expr, $component:expr) => {
        $crate::PerfhubError::Unauthorized {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Log in again to obtain a fresh credential"),
        }
    };
}

#[macro_export]
macro_rules! transient_error {
    ($msg:expr, $component:expr) => {
        $crate::PerfhubError::Transient {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::PerfhubError::Transient {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! request_error {
    ($msg:expr, $status:expr, $component:expr) => {
        $crate::PerfhubError::Request {
            message: $msg.to_string(),
            status: $status,
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::PerfhubError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'perfhub config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::PerfhubError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::PerfhubError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}
