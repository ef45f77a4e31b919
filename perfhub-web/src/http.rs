//! REST client for the auth and notification endpoints

use async_trait::async_trait;
use perfhub_core::{
    ApiConfig, AuthService, Credential, ErrorContext, LoginCredentials, LoginResponse,
    NotificationFilters, NotificationId, NotificationPage, NotificationService, PerfhubError,
    PerfhubResult, UserProfile,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const COMPONENT: &str = "http_api_client";

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Error body shape the backend uses for rejected requests
#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// reqwest-backed [`AuthService`] and [`NotificationService`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpApiClient {
    pub fn new(config: ApiConfig) -> PerfhubResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("perfhub-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PerfhubError::Config {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new(COMPONENT).with_operation("create_client"),
            })?;

        info!(base_url = %config.base_url, "Created PerfHub API client");

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        let url = self.url(endpoint);
        debug!(method = %method, url = %url, "Making PerfHub API request");

        let builder = self.client.request(method, url);
        match credential {
            Some(credential) => builder.header(
                reqwest::header::AUTHORIZATION,
                credential.authorization_header(),
            ),
            None => builder,
        }
    }

    /// Send and map transport failures; the response status is left to the caller
    async fn send(&self, builder: RequestBuilder, operation: &str) -> PerfhubResult<Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PerfhubError::Timeout {
                    operation: operation.to_string(),
                    duration_ms: self.config.timeout_ms,
                    context: ErrorContext::new(COMPONENT)
                        .with_operation(operation)
                        .with_suggestion("Check network connectivity and API status"),
                }
            } else {
                PerfhubError::Transient {
                    message: format!("Failed to reach PerfHub API: {}", e),
                    source: Some(Box::new(e)),
                    context: ErrorContext::new(COMPONENT)
                        .with_operation(operation)
                        .with_suggestion("Check that the API server is running"),
                }
            }
        })
    }

    /// Send an authenticated request and require a success status
    async fn execute(&self, builder: RequestBuilder, operation: &str) -> PerfhubResult<Response> {
        let response = self.send(builder, operation).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(handle_response_error(response, operation).await)
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response, operation: &str) -> PerfhubResult<T> {
        response.json::<T>().await.map_err(|e| PerfhubError::Request {
            message: format!("Failed to parse response: {}", e),
            status: None,
            source: Some(Box::new(e)),
            context: ErrorContext::new(COMPONENT).with_operation(operation),
        })
    }
}

/// Map a non-success response onto the error taxonomy
///
/// 401 always becomes [`PerfhubError::Unauthorized`] so the session manager
/// can tear the session down; everything else is a [`PerfhubError::Request`].
pub(crate) async fn handle_response_error(response: Response, operation: &str) -> PerfhubError {
    let status = response.status();
    let url = response.url().clone();
    let message = error_detail(response).await.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    });

    if status == StatusCode::UNAUTHORIZED {
        return PerfhubError::Unauthorized {
            message,
            context: ErrorContext::new(COMPONENT)
                .with_operation(operation)
                .with_metadata("url", url.as_str())
                .with_suggestion("Log in again to obtain a fresh credential"),
        };
    }

    PerfhubError::Request {
        message: format!("HTTP {} error for {}: {}", status.as_u16(), url, message),
        status: Some(status.as_u16()),
        source: None,
        context: ErrorContext::new(COMPONENT)
            .with_operation(operation)
            .with_suggestion(match status.as_u16() {
                403 => "Check that your role grants this action",
                404 => "The resource no longer exists",
                _ => "Check network connectivity and API status",
            }),
    }
}

/// `detail` from a JSON error body, or the raw body text
async fn error_detail(response: Response) -> Option<String> {
    let body = response.text().await.ok()?;
    if body.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => Some(detail),
        Ok(ErrorBody { detail }) => Some(detail.to_string()),
        Err(_) => Some(body),
    }
}

#[async_trait]
impl AuthService for HttpApiClient {
    async fn login(&self, credentials: &LoginCredentials) -> PerfhubResult<LoginResponse> {
        let body = LoginRequest {
            email: &credentials.username,
            password: &credentials.password,
        };
        let builder = self.request(Method::POST, "auth/login", None).json(&body);
        let response = self.send(builder, "login").await?;

        match response.status() {
            status if status.is_success() => Self::parse(response, "login").await,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let message = error_detail(response)
                    .await
                    .unwrap_or_else(|| "Invalid credentials".to_string());
                Err(PerfhubError::Auth {
                    message,
                    context: ErrorContext::new(COMPONENT)
                        .with_operation("login")
                        .with_suggestion("Check the username and password"),
                })
            }
            _ => Err(handle_response_error(response, "login").await),
        }
    }

    async fn logout(&self, credential: &Credential) -> PerfhubResult<()> {
        let builder = self.request(Method::POST, "auth/logout", Some(credential));
        self.execute(builder, "logout").await?;
        Ok(())
    }

    async fn me(&self, credential: &Credential) -> PerfhubResult<UserProfile> {
        let builder = self.request(Method::GET, "auth/me", Some(credential));
        let response = self.execute(builder, "me").await?;
        Self::parse(response, "me").await
    }
}

#[async_trait]
impl NotificationService for HttpApiClient {
    async fn list(
        &self,
        credential: &Credential,
        filters: &NotificationFilters,
    ) -> PerfhubResult<NotificationPage> {
        let builder = self
            .request(Method::GET, "notifications", Some(credential))
            .query(&filters.to_query_pairs());
        let response = self.execute(builder, "list_notifications").await?;
        Self::parse(response, "list_notifications").await
    }

    async fn mark_read(&self, credential: &Credential, id: &NotificationId) -> PerfhubResult<()> {
        let endpoint = format!("notifications/{}/read", urlencoding::encode(id.as_str()));
        let builder = self.request(Method::PUT, &endpoint, Some(credential));
        self.execute(builder, "mark_notification_read").await?;
        Ok(())
    }

    async fn mark_all_read(&self, credential: &Credential) -> PerfhubResult<()> {
        let builder = self.request(Method::PUT, "notifications/read-all", Some(credential));
        self.execute(builder, "mark_all_notifications_read").await?;
        Ok(())
    }

    async fn delete(&self, credential: &Credential, id: &NotificationId) -> PerfhubResult<()> {
        let endpoint = format!("notifications/{}", urlencoding::encode(id.as_str()));
        let builder = self.request(Method::DELETE, &endpoint, Some(credential));
        self.execute(builder, "delete_notification").await?;
        Ok(())
    }
}
