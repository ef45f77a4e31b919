//! Mock PerfHub backend for adapter tests
//!
//! Serves the REST endpoints and the `/ws/{token}` upgrade on an ephemeral
//! port, recording what the client sent.

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use perfhub_core::{ApiConfig, RealtimeConfig, RetryConfig};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const LIVE_TOKEN: &str = "live-token";
pub const REVOKED_TOKEN: &str = "revoked-token";
/// First connection is closed by the server right after its frames
pub const DROPPING_TOKEN: &str = "dropping-token";
/// Server closes with a policy-violation frame
pub const POLICY_TOKEN: &str = "policy-token";
/// First connection is closed normally; every reconnect is refused with 403
pub const EXPIRING_TOKEN: &str = "expiring-token";

pub const EMAIL: &str = "ana@example.com";
pub const PASSWORD: &str = "secret";

// Ensure tracing is only initialized once
static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

#[derive(Clone, Default)]
pub struct BackendState {
    pub requests: Arc<Mutex<Vec<String>>>,
    pub client_frames: Arc<Mutex<Vec<String>>>,
    pub ws_connections: Arc<AtomicUsize>,
    pub ws_closed: Arc<AtomicUsize>,
}

impl BackendState {
    fn record(&self, line: String) {
        self.requests.lock().unwrap().push(line);
    }
}

pub struct MockBackend {
    pub address: String,
    pub port: u16,
    pub state: BackendState,
}

impl MockBackend {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: format!("{}/api", self.address),
            timeout_ms: 2_000,
        }
    }

    pub fn realtime_config(&self, ping_interval_secs: u64) -> RealtimeConfig {
        RealtimeConfig {
            url: format!("ws://127.0.0.1:{}", self.port),
            ping_interval_secs,
            event_buffer: 16,
            reconnect: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn client_frames(&self) -> Vec<String> {
        self.state.client_frames.lock().unwrap().clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ws_closed(&self) -> usize {
        self.state.ws_closed.load(Ordering::SeqCst)
    }
}

/// Start the mock backend on a random port
pub async fn spawn_backend() -> MockBackend {
    LazyLock::force(&TRACING);

    let state = BackendState::default();
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", put(mark_all_read))
        .route("/api/notifications/{id}/read", put(mark_read))
        .route("/api/notifications/{id}", delete(delete_notification))
        .route("/ws/{token}", get(websocket))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend {
        address: format!("http://127.0.0.1:{}", port),
        port,
        state,
    }
}

pub fn user_json() -> Value {
    json!({
        "user_id": "u1",
        "email": EMAIL,
        "name": "Ana Lima",
        "role_name": "Manager",
        "organization_name": "Acme",
        "permissions": ["task_view_all", "goal_create"],
        "effective_scope": "department",
        "is_leadership": false
    })
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {}", LIVE_TOKEN))
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Could not validate credentials"})),
    )
        .into_response()
}

async fn login(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
    state.record("POST /api/auth/login".to_string());

    if body["email"] == EMAIL && body["password"] == PASSWORD {
        Json(json!({
            "access_token": LIVE_TOKEN,
            "token_type": "bearer",
            "user": user_json(),
            "permissions": ["task_view_all", "goal_create"],
            "scope": "department"
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Incorrect email or password"})),
        )
            .into_response()
    }
}

async fn logout(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.record("POST /api/auth/logout".to_string());
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    Json(json!({"message": "Successfully logged out"})).into_response()
}

async fn me(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.record("GET /api/auth/me".to_string());
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    Json(user_json()).into_response()
}

async fn list_notifications(
    State(state): State<BackendState>,
    headers: HeaderMap,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let query = query
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    state.record(format!("GET /api/notifications?{}", query));

    if !bearer_ok(&headers) {
        return unauthorized();
    }

    Json(json!({
        "notifications": [
            {
                "id": 11,
                "title": "Task submitted",
                "message": "Quarterly report is ready for review",
                "type": "TASK_SUBMITTED",
                "priority": "HIGH",
                "is_read": false,
                "created_at": "2024-03-02T09:30:00.000000"
            },
            {
                "id": 10,
                "title": "Goal approved",
                "type": "GOAL_APPROVED",
                "is_read": true,
                "created_at": "2024-03-01T08:00:00Z"
            }
        ],
        "unread_count": 3
    }))
    .into_response()
}

async fn mark_read(
    State(state): State<BackendState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.record(format!("PUT /api/notifications/{}/read", id));
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    if id == "404" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Notification not found"})),
        )
            .into_response();
    }
    Json(json!({"message": "Notification marked as read"})).into_response()
}

async fn mark_all_read(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.record("PUT /api/notifications/read-all".to_string());
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    Json(json!({"message": "All notifications marked as read"})).into_response()
}

async fn delete_notification(
    State(state): State<BackendState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.record(format!("DELETE /api/notifications/{}", id));
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn websocket(
    State(state): State<BackendState>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if token == REVOKED_TOKEN {
        return StatusCode::FORBIDDEN.into_response();
    }
    if token == EXPIRING_TOKEN && state.ws_connections.load(Ordering::SeqCst) > 0 {
        return StatusCode::FORBIDDEN.into_response();
    }

    let connection = state.ws_connections.fetch_add(1, Ordering::SeqCst) + 1;
    ws.on_upgrade(move |socket| serve_socket(socket, token, connection, state))
}

fn notification_frame(id: usize) -> String {
    json!({
        "type": "new_notification",
        "notification": {
            "id": id,
            "title": "Goal assigned",
            "message": "You have been assigned a new goal",
            "type": "GOAL_ASSIGNED",
            "priority": "NORMAL",
            "is_read": false,
            "created_at": "2024-03-01T10:00:00Z"
        }
    })
    .to_string()
}

async fn serve_socket(mut socket: WebSocket, token: String, connection: usize, state: BackendState) {
    let id = connection * 100;
    let frames = [
        json!({"type": "connection_established", "data": {"user_id": "u1"}}).to_string(),
        notification_frame(id),
        json!({"type": "marked_read", "notification_id": id}).to_string(),
    ];

    for frame in frames {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    if (token == DROPPING_TOKEN || token == EXPIRING_TOKEN) && connection == 1 {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    if token == POLICY_TOKEN {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "token revoked".into(),
            })))
            .await;
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => state.client_frames.lock().unwrap().push(text.to_string()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    state.ws_closed.fetch_add(1, Ordering::SeqCst);
}

/// Poll until `condition` holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not reached in time");
}
