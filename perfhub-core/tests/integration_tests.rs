//! Integration tests for perfhub-core infrastructure

use futures::FutureExt;
use perfhub_core::{
    config_error, request_error, retry_async, transient_error, unauthorized_error, with_timeout,
    ClientConfig, ErrorContext, LogFormat, PerfhubError, RetryConfig,
};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn test_error_classification() {
    let unauthorized = unauthorized_error!("token rejected", "auth_client");
    assert!(unauthorized.is_unauthorized());
    assert!(!unauthorized.is_recoverable());
    assert_eq!(unauthorized.status(), Some(401));
    assert!(!unauthorized.context().unwrap().recovery_suggestions.is_empty());

    let transient = transient_error!("connection reset", "auth_client");
    assert!(transient.is_recoverable());
    assert!(transient.retry_delay_ms().is_some());
    assert!(!transient.is_unauthorized());

    let client_side = request_error!("not found", Some(404), "notifications");
    assert!(!client_side.is_recoverable());
    assert_eq!(client_side.status(), Some(404));

    let server_side = request_error!("bad gateway", Some(502), "notifications");
    assert!(server_side.is_recoverable());

    let config = config_error!("missing url", "config");
    assert!(!config.is_recoverable());
    assert!(config.retry_delay_ms().is_none());

    // Logging must not panic without a subscriber
    transient.log();
    unauthorized.log();
}

#[tokio::test]
async fn test_retry_mechanism() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let attempt_count = Arc::new(AtomicUsize::new(0));

    let operation = {
        let attempt_count = Arc::clone(&attempt_count);
        move || {
            let count = attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(transient_error!("Temporary failure", "retry_test"))
                } else {
                    Ok("Success")
                }
            }
            .boxed()
        }
    };

    let config = RetryConfig {
        max_attempts: 5,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        jitter: false,
    };

    let result = retry_async(operation, config, "test_operation").await;
    assert_eq!(result.unwrap(), "Success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_stops_on_non_recoverable_error() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let operation = {
        let attempt_count = Arc::clone(&attempt_count);
        move || {
            attempt_count.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(unauthorized_error!("token rejected", "retry_test")) }.boxed()
        }
    };

    let result = retry_async(operation, RetryConfig::default(), "rejected_operation").await;

    assert!(result.unwrap_err().is_unauthorized());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_at_least_the_error_hint() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let operation = {
        let attempt_count = Arc::clone(&attempt_count);
        move || {
            let count = attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count == 1 {
                    Err(request_error!("bad gateway", Some(502), "retry_test"))
                } else {
                    Ok(count)
                }
            }
            .boxed()
        }
    };
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 5_000,
        backoff_multiplier: 2.0,
        jitter: false,
    };

    let started = tokio::time::Instant::now();
    let result = retry_async(operation, config, "hinted_operation").await;

    assert_eq!(result.unwrap(), 2);
    // A recoverable request error asks for a one second pause
    assert!(started.elapsed() >= Duration::from_millis(1_000));
}

#[tokio::test]
async fn test_timeout_mechanism() {
    let quick_operation = async {
        sleep(Duration::from_millis(10)).await;
        "Success"
    };

    let result = with_timeout(quick_operation, 100, "quick_test").await;
    assert_eq!(result.unwrap(), "Success");

    let slow_operation = async {
        sleep(Duration::from_millis(200)).await;
        "Should not reach here"
    };

    match with_timeout(slow_operation, 50, "slow_test").await {
        Err(PerfhubError::Timeout {
            operation,
            duration_ms,
            ..
        }) => {
            assert_eq!(operation, "slow_test");
            assert_eq!(duration_ms, 50);
        }
        other => panic!("Expected Timeout error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_config_validation() {
    let mut config = ClientConfig::default();
    assert!(config.validate().is_ok());

    config.realtime.url = "http://localhost:8000".to_string();
    match config.validate() {
        Err(PerfhubError::Config { message, .. }) => assert!(message.contains("realtime.url")),
        other => panic!("Expected Config error, got {:?}", other),
    }

    let mut config = ClientConfig::default();
    config.session.login_route = "login".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("perfhub.toml");

    let mut config = ClientConfig::default();
    config.api.base_url = "https://perf.example.com/api".to_string();
    config.session.logout_settle_ms = 250;
    config.logging.format = LogFormat::Json;
    config.save_to_file(&path).unwrap();

    let loaded = ClientConfig::from_file(&path).unwrap();
    assert_eq!(loaded.api.base_url, "https://perf.example.com/api");
    assert_eq!(loaded.session.logout_settle_ms, 250);
    assert_eq!(loaded.logging.format, LogFormat::Json);
    assert_eq!(loaded.session.override_permission, "system_admin");
}

#[test]
fn test_partial_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perfhub.toml");
    std::fs::write(&path, "[session]\nlogin_route = \"/signin\"\n").unwrap();

    let loaded = ClientConfig::from_file(&path).unwrap();
    assert_eq!(loaded.session.login_route, "/signin");
    assert_eq!(loaded.session.logout_settle_ms, 500);
    assert_eq!(loaded.api.base_url, "http://localhost:8000/api");

    std::fs::write(&path, "[session\n").unwrap();
    match ClientConfig::from_file(&path) {
        Err(PerfhubError::Config { context, .. }) => {
            assert_eq!(context.operation.as_deref(), Some("parse_toml"));
        }
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
fn test_error_context_builder() {
    let context = ErrorContext::new("session")
        .with_operation("login")
        .with_metadata("user", "a@b.com")
        .with_suggestion("Retry later");

    assert_eq!(context.component, "session");
    assert_eq!(context.operation.as_deref(), Some("login"));
    assert_eq!(context.metadata.get("user").map(String::as_str), Some("a@b.com"));
    assert_eq!(context.recovery_suggestions.len(), 1);
    assert!(!context.error_id.is_empty());
}
