//! In-process fakes for the session and relay collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use perfhub_applications::{MemoryCredentialStore, SessionManager};
use perfhub_core::{
    auth_error, request_error, transient_error, unauthorized_error, AuthService,
    ChannelSubscription, ChannelTermination, Credential, CredentialStore, InboundEvent,
    LoginCredentials, LoginResponse, Navigator, NotificationFilters, NotificationId,
    NotificationPage, NotificationService, PerfhubResult, QueryCache, QueryKey, RealtimeChannel,
    SessionConfig, UserProfile,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Signed JWT whose `exp` is `seconds` from now (negative for the past)
pub fn token_expiring_in(seconds: i64) -> String {
    let claims = Claims {
        sub: "u1".to_string(),
        exp: chrono::Utc::now().timestamp() + seconds,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"perfhub-test-secret"),
    )
    .unwrap()
}

pub fn valid_credential() -> Credential {
    Credential::bearer(token_expiring_in(3600))
}

pub fn expired_credential() -> Credential {
    Credential::bearer(token_expiring_in(-3600))
}

#[derive(Clone)]
pub enum MeBehavior {
    Ok(UserProfile),
    Unauthorized,
    Transient,
}

#[derive(Clone)]
pub enum LoginBehavior {
    Ok(LoginResponse),
    BadCredentials,
}

#[derive(Clone, Copy, PartialEq)]
pub enum LogoutBehavior {
    Ok,
    Fail,
    Hang,
}

pub struct FakeAuth {
    pub login: Mutex<LoginBehavior>,
    pub me: Mutex<MeBehavior>,
    pub logout: Mutex<LogoutBehavior>,
    pub me_delay: Mutex<Option<Duration>>,
    pub me_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn new(me: MeBehavior) -> Self {
        Self {
            login: Mutex::new(LoginBehavior::BadCredentials),
            me: Mutex::new(me),
            logout: Mutex::new(LogoutBehavior::Ok),
            me_delay: Mutex::new(None),
            me_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_login(self, login: LoginBehavior) -> Self {
        *self.login.lock().unwrap() = login;
        self
    }

    pub fn with_logout(self, logout: LogoutBehavior) -> Self {
        *self.logout.lock().unwrap() = logout;
        self
    }

    pub fn set_me(&self, me: MeBehavior) {
        *self.me.lock().unwrap() = me;
    }

    pub fn set_me_delay(&self, delay: Duration) {
        *self.me_delay.lock().unwrap() = Some(delay);
    }

    pub fn me_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn login(&self, _credentials: &LoginCredentials) -> PerfhubResult<LoginResponse> {
        let behavior = self.login.lock().unwrap().clone();
        match behavior {
            LoginBehavior::Ok(response) => Ok(response),
            LoginBehavior::BadCredentials => Err(auth_error!("Invalid credentials", "fake_auth")),
        }
    }

    async fn logout(&self, _credential: &Credential) -> PerfhubResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.logout.lock().unwrap();
        match behavior {
            LogoutBehavior::Ok => Ok(()),
            LogoutBehavior::Fail => Err(transient_error!("logout endpoint down", "fake_auth")),
            LogoutBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn me(&self, _credential: &Credential) -> PerfhubResult<UserProfile> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.me_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.me.lock().unwrap().clone();
        match behavior {
            MeBehavior::Ok(user) => Ok(user),
            MeBehavior::Unauthorized => Err(unauthorized_error!("token rejected", "fake_auth")),
            MeBehavior::Transient => Err(transient_error!("connection refused", "fake_auth")),
        }
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn replace(&self, route: &str) {
        self.routes.lock().unwrap().push(route.to_string());
    }
}

#[derive(Default)]
pub struct RecordingCache {
    pub invalidated: Mutex<Vec<QueryKey>>,
}

impl RecordingCache {
    pub fn invalidated(&self) -> Vec<QueryKey> {
        self.invalidated.lock().unwrap().clone()
    }

    pub fn count(&self, key: &QueryKey) -> usize {
        self.invalidated
            .lock()
            .unwrap()
            .iter()
            .filter(|k| *k == key)
            .count()
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, key: &QueryKey) {
        self.invalidated.lock().unwrap().push(key.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    List(NotificationFilters),
    MarkRead(NotificationId),
    MarkAllRead,
    Delete(NotificationId),
}

#[derive(Clone, Copy, PartialEq)]
pub enum ServiceBehavior {
    Ok,
    ServerError,
    ClientError,
    Unauthorized,
}

pub struct FakeNotificationService {
    pub page: Mutex<NotificationPage>,
    pub behavior: Mutex<ServiceBehavior>,
    pub calls: Mutex<Vec<ServiceCall>>,
    /// `list` waits for a permit on this before answering
    pub list_gate: Mutex<Option<Arc<Notify>>>,
    /// Number of upcoming `list` calls that fail transiently
    pub list_failures: AtomicUsize,
}

impl FakeNotificationService {
    pub fn new(page: NotificationPage) -> Self {
        Self {
            page: Mutex::new(page),
            behavior: Mutex::new(ServiceBehavior::Ok),
            calls: Mutex::new(Vec::new()),
            list_gate: Mutex::new(None),
            list_failures: AtomicUsize::new(0),
        }
    }

    /// Hold every `list` call until the returned gate is notified
    pub fn gate_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_next_lists(&self, failures: usize) {
        self.list_failures.store(failures, Ordering::SeqCst);
    }

    pub fn set_behavior(&self, behavior: ServiceBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ServiceCall) -> PerfhubResult<()> {
        self.calls.lock().unwrap().push(call);
        match *self.behavior.lock().unwrap() {
            ServiceBehavior::Ok => Ok(()),
            ServiceBehavior::ServerError => Err(request_error!(
                "Internal Server Error",
                Some(500),
                "fake_notifications"
            )),
            ServiceBehavior::ClientError => Err(request_error!(
                "Notification not found",
                Some(404),
                "fake_notifications"
            )),
            ServiceBehavior::Unauthorized => {
                Err(unauthorized_error!("token rejected", "fake_notifications"))
            }
        }
    }
}

#[async_trait]
impl NotificationService for FakeNotificationService {
    async fn list(
        &self,
        _credential: &Credential,
        filters: &NotificationFilters,
    ) -> PerfhubResult<NotificationPage> {
        self.record(ServiceCall::List(filters.clone()))?;

        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failing = self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(transient_error!("connection reset", "fake_notifications"));
        }

        Ok(self.page.lock().unwrap().clone())
    }

    async fn mark_read(&self, _credential: &Credential, id: &NotificationId) -> PerfhubResult<()> {
        self.record(ServiceCall::MarkRead(id.clone()))
    }

    async fn mark_all_read(&self, _credential: &Credential) -> PerfhubResult<()> {
        self.record(ServiceCall::MarkAllRead)
    }

    async fn delete(&self, _credential: &Credential, id: &NotificationId) -> PerfhubResult<()> {
        self.record(ServiceCall::Delete(id.clone()))
    }
}

/// Channel whose events are pushed by the test
#[derive(Default)]
pub struct FakeChannel {
    pub sender: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    pub connected: Mutex<Option<watch::Sender<bool>>>,
    pub closed: Mutex<Option<oneshot::Receiver<()>>>,
    pub termination: Mutex<Option<oneshot::Sender<ChannelTermination>>>,
    pub connects: AtomicUsize,
}

impl FakeChannel {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub async fn push(&self, event: InboundEvent) {
        let sender = self.sender.lock().unwrap().clone();
        sender.expect("channel not connected").send(event).await.unwrap();
    }

    pub fn set_connected(&self, connected: bool) {
        if let Some(sender) = self.connected.lock().unwrap().as_ref() {
            sender.send_replace(connected);
        }
    }

    /// End the live subscription the way a server-side teardown would
    pub fn end(&self, reason: ChannelTermination) {
        if let Some(termination) = self.termination.lock().unwrap().take() {
            let _ = termination.send(reason);
        }
        self.sender.lock().unwrap().take();
        self.connected.lock().unwrap().take();
    }

    /// Whether the relay dropped or closed its subscription
    pub fn subscription_closed(&self) -> bool {
        match self.closed.lock().unwrap().as_mut() {
            Some(closed) => !matches!(closed.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => true,
        }
    }
}

#[async_trait]
impl RealtimeChannel for FakeChannel {
    async fn connect(&self, _credential: &Credential) -> PerfhubResult<ChannelSubscription> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::channel(64);
        let (connected_tx, connected_rx) = watch::channel(true);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (termination_tx, termination_rx) = oneshot::channel();

        *self.sender.lock().unwrap() = Some(events_tx);
        *self.connected.lock().unwrap() = Some(connected_tx);
        *self.closed.lock().unwrap() = Some(shutdown_rx);
        *self.termination.lock().unwrap() = Some(termination_tx);

        Ok(ChannelSubscription::new(
            events_rx,
            connected_rx,
            shutdown_tx,
            termination_rx,
        ))
    }
}

pub struct SessionFixture {
    pub auth: Arc<FakeAuth>,
    pub store: Arc<MemoryCredentialStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub session: SessionManager,
}

pub fn session_fixture(auth: FakeAuth, store: MemoryCredentialStore) -> SessionFixture {
    let auth = Arc::new(auth);
    let store = Arc::new(store);
    let navigator = Arc::new(RecordingNavigator::default());
    let session = SessionManager::new(
        auth.clone(),
        store.clone(),
        navigator.clone(),
        SessionConfig::default(),
    );

    SessionFixture {
        auth,
        store,
        navigator,
        session,
    }
}

impl SessionFixture {
    pub fn stored_credential(&self) -> Option<Credential> {
        self.store.credential().unwrap()
    }
}

pub fn user(id: &str, permissions: &[&str]) -> UserProfile {
    UserProfile::new(id).with_permissions(permissions.iter().copied())
}

/// Poll until `condition` holds, yielding to spawned tasks in between
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(condition(), "condition not reached in time");
}
