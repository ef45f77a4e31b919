//! Session Manager - Credential lifecycle and current-user state
//!
//! Every transition that supersedes a session (login, logout, expiry, stop)
//! advances the session epoch. Fetch results and 401 teardowns remember the
//! epoch they started under and are dropped once it has moved on.

use super::{GuardDecision, SessionEvent, SessionPhase, SessionSnapshot};
use crate::auth::PermissionSet;
use perfhub_core::{
    log_operation_error, log_operation_start, log_operation_success, transient_error,
    unauthorized_error, with_timeout, AuthService, Credential, CredentialStore, LoginCredentials,
    LoginResponse, Navigator, PerfhubError, PerfhubResult, SessionConfig, UserProfile,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Session manager with injected collaborators
#[derive(Clone)]
pub struct SessionManager {
    auth: Arc<dyn AuthService>,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    config: SessionConfig,
    /// Published session state
    state: Arc<watch::Sender<SessionSnapshot>>,
    /// One-shot session signals
    events: broadcast::Sender<SessionEvent>,
    epoch: Arc<AtomicU64>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(32);

        Self {
            auth,
            store,
            navigator,
            config,
            state: Arc::new(state),
            events,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current session state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Watch every session state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Receive login, logout and expiry signals
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    /// Stored credential, if present and not locally expired
    pub fn active_credential(&self) -> Option<Credential> {
        match self.store.credential() {
            Ok(Some(credential)) if !self.is_expired(&credential) => Some(credential),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credential");
                None
            }
        }
    }

    /// Lifecycle entry point
    pub async fn start(&self) -> SessionSnapshot {
        self.initialize().await
    }

    /// Restore the session from the stored credential
    pub async fn initialize(&self) -> SessionSnapshot {
        let epoch = self.advance_epoch();
        self.update(|s| {
            s.loading = true;
            s.phase = SessionPhase::Loading;
        });

        let credential = match self.store.credential() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credential, treating as absent");
                None
            }
        };

        match credential {
            None => {
                debug!("No stored credential");
                self.update(|s| {
                    s.user = None;
                    s.credential_present = false;
                    s.credential_expired = false;
                    s.loading = false;
                    s.phase = SessionPhase::Unauthenticated;
                });
            }
            Some(credential) if self.is_expired(&credential) => {
                self.expire_session(epoch, "stored credential expired");
            }
            Some(credential) => {
                self.update(|s| s.credential_present = true);
                self.fetch_user(epoch, &credential).await;
            }
        }

        self.snapshot()
    }

    /// Exchange credentials for a session
    ///
    /// Bad credentials surface as `PerfhubError::Auth`. A login overtaken by a
    /// newer transition (logout, another login) fails with
    /// `PerfhubError::Transient` and adopts nothing. Never navigates.
    pub async fn login(&self, credentials: &LoginCredentials) -> PerfhubResult<LoginResponse> {
        log_operation_start!("login", username = %credentials.username);

        let epoch = self.advance_epoch();
        self.update(|s| {
            s.loading = true;
            s.logging_out = false;
            s.phase = SessionPhase::Loading;
        });

        let response = match self.auth.login(credentials).await {
            Ok(response) => response,
            Err(e) => {
                log_operation_error!("login", e);
                self.settle_failed_login(epoch);
                return Err(e);
            }
        };

        if !self.is_current(epoch) {
            return Err(Self::superseded_login());
        }

        let credential = Credential::from_login(&response);
        if let Err(e) = self.store.store_credential(&credential) {
            log_operation_error!("login", e);
            self.settle_failed_login(epoch);
            return Err(e);
        }

        let user = match response.user.clone() {
            Some(user) => user.with_grants(response.permissions.clone(), response.scope.clone()),
            None => match self.auth.me(&credential).await {
                Ok(user) => user.with_grants(response.permissions.clone(), response.scope.clone()),
                Err(e) => {
                    log_operation_error!("login", e);
                    if self.is_current(epoch) {
                        if let Err(clear_err) = self.store.clear() {
                            warn!(error = %clear_err, "Failed to clear credential after login");
                        }
                        self.update(|s| {
                            s.user = None;
                            s.credential_present = false;
                            s.loading = false;
                            s.phase = SessionPhase::Unauthenticated;
                        });
                    }
                    return Err(e);
                }
            },
        };

        if !self.is_current(epoch) {
            return Err(Self::superseded_login());
        }

        if let Err(e) = self.store.cache_profile(&user) {
            warn!(error = %e, "Failed to cache user profile");
        }

        let user_id = user.id.clone();
        self.update(|s| {
            s.user = Some(user);
            s.credential_present = true;
            s.credential_expired = false;
            s.loading = false;
            s.phase = SessionPhase::Authenticated;
        });
        self.emit(SessionEvent::LoggedIn {
            user_id: user_id.clone(),
        });

        log_operation_success!("login", user_id = %user_id);
        Ok(response)
    }

    /// End the session locally and notify the server in the background
    ///
    /// Always succeeds locally; the remote call is bounded by
    /// `remote_logout_timeout_ms` and its failure is only logged.
    pub fn logout(&self) {
        let credential = self.store.credential().ok().flatten();
        let epoch = self.advance_epoch();

        self.update(|s| {
            s.logging_out = true;
            s.phase = SessionPhase::LoggingOut;
        });

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credential during logout");
        }

        self.update(|s| {
            s.user = None;
            s.credential_present = false;
            s.credential_expired = false;
            s.loading = false;
        });

        self.navigator.replace(&self.config.login_route);
        self.emit(SessionEvent::LoggedOut);
        info!("Logged out");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime to settle on; finish synchronously
            self.finish_logout(epoch);
            return;
        };

        if let Some(credential) = credential {
            let auth = Arc::clone(&self.auth);
            let timeout_ms = self.config.remote_logout_timeout_ms;
            runtime.spawn(async move {
                match with_timeout(auth.logout(&credential), timeout_ms, "remote_logout").await {
                    Ok(Ok(())) => debug!("Remote logout completed"),
                    Ok(Err(e)) => warn!(error = %e, "Remote logout failed"),
                    Err(e) => warn!(error = %e, "Remote logout timed out"),
                }
            });
        }

        let manager = self.clone();
        let settle = Duration::from_millis(self.config.logout_settle_ms);
        runtime.spawn(async move {
            tokio::time::sleep(settle).await;
            manager.finish_logout(epoch);
        });
    }

    /// Re-fetch the current user when a valid credential exists
    pub async fn refresh_user(&self) -> SessionSnapshot {
        let Some(credential) = self.active_credential() else {
            debug!("No valid credential, skipping user refresh");
            return self.snapshot();
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        self.fetch_user(epoch, &credential).await;
        self.snapshot()
    }

    /// Invalidate in-flight fetches without touching persisted credentials
    pub fn stop(&self) {
        self.advance_epoch();
        self.update(|s| {
            if s.loading {
                s.loading = false;
                if s.phase == SessionPhase::Loading {
                    s.phase = if s.user.is_some() {
                        SessionPhase::Authenticated
                    } else {
                        SessionPhase::Uninitialized
                    };
                }
            }
            if s.logging_out {
                s.logging_out = false;
                s.phase = SessionPhase::Unauthenticated;
            }
        });
        debug!("Session manager stopped");
    }

    /// Permissions of the current user
    pub fn permissions(&self) -> PermissionSet {
        match self.state.borrow().user.as_ref() {
            Some(user) => PermissionSet::for_user(user, self.config.override_permission.clone()),
            None => PermissionSet::empty(self.config.override_permission.clone()),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions().has(permission)
    }

    pub fn has_all_permissions(&self, permissions: &[&str]) -> bool {
        self.permissions().has_all(permissions)
    }

    pub fn has_any_permission(&self, permissions: &[&str]) -> bool {
        self.permissions().has_any(permissions)
    }

    pub fn is_superuser(&self) -> bool {
        self.permissions().is_superuser()
    }

    pub fn role_name(&self) -> Option<String> {
        self.state.borrow().user.as_ref()?.role_name.clone()
    }

    pub fn organization_name(&self) -> Option<String> {
        self.state.borrow().user.as_ref()?.organization_name.clone()
    }

    /// Route guard decision for protected views
    pub fn guard(&self) -> GuardDecision {
        GuardDecision::from_snapshot(&self.state.borrow())
    }

    /// Like [`guard`](Self::guard), navigating to the login route on redirect
    pub fn enforce_guard(&self) -> GuardDecision {
        let decision = self.guard();
        if decision == GuardDecision::RedirectToLogin {
            self.navigator.replace(&self.config.login_route);
        }
        decision
    }

    /// Run an authenticated collaborator call
    ///
    /// A missing credential fails with `Unauthorized`; an expired one, or an
    /// `Unauthorized` result, tears the session down before the error is
    /// returned.
    pub async fn authorized<T, F, Fut>(&self, operation: &str, call: F) -> PerfhubResult<T>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = PerfhubResult<T>>,
    {
        let epoch = self.epoch.load(Ordering::SeqCst);

        let credential = self
            .store
            .credential()?
            .ok_or_else(|| unauthorized_error!("No credential available", "session"))?;

        if self.is_expired(&credential) {
            self.expire_session(epoch, operation);
            return Err(unauthorized_error!("Credential expired", "session"));
        }

        match call(credential).await {
            Err(e) if e.is_unauthorized() => {
                warn!(operation = operation, "Server rejected credential");
                self.expire_session(epoch, operation);
                Err(e)
            }
            result => result,
        }
    }

    async fn fetch_user(&self, epoch: u64, credential: &Credential) {
        let result = self.auth.me(credential).await;

        if !self.is_current(epoch) {
            debug!("Discarding stale current-user result");
            return;
        }

        match result {
            Ok(user) => {
                if let Err(e) = self.store.cache_profile(&user) {
                    warn!(error = %e, "Failed to cache user profile");
                }
                debug!(user_id = %user.id, "Current user loaded");
                self.update(|s| {
                    s.user = Some(user);
                    s.credential_present = true;
                    s.credential_expired = false;
                    s.loading = false;
                    s.phase = SessionPhase::Authenticated;
                });
            }
            Err(e) if e.is_unauthorized() => {
                self.expire_session(epoch, "current user rejected");
            }
            Err(e) => {
                e.log();
                let cached = self.store.cached_profile().ok().flatten();
                if cached.is_some() {
                    info!("Using cached profile after failed user fetch");
                }
                self.update(|s| {
                    s.phase = if cached.is_some() {
                        SessionPhase::Authenticated
                    } else {
                        SessionPhase::Unauthenticated
                    };
                    s.user = cached;
                    s.credential_present = true;
                    s.loading = false;
                });
            }
        }
    }

    /// Tear the session down after expiry; at most once per epoch
    fn expire_session(&self, epoch: u64, reason: &str) -> bool {
        if self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(reason = reason, "Ignoring stale session expiry");
            return false;
        }

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credential after expiry");
        }

        self.update(|s| {
            s.user = None;
            s.credential_present = false;
            s.credential_expired = true;
            s.loading = false;
            s.logging_out = false;
            s.phase = SessionPhase::Unauthenticated;
        });

        info!(reason = reason, "Session expired");
        self.emit(SessionEvent::Expired);
        self.navigator.replace(&self.config.login_route);
        true
    }

    fn finish_logout(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        self.update(|s| {
            s.logging_out = false;
            s.phase = SessionPhase::Unauthenticated;
        });
    }

    fn settle_failed_login(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        self.update(|s| {
            s.loading = false;
            s.phase = if s.user.is_some() {
                SessionPhase::Authenticated
            } else {
                SessionPhase::Unauthenticated
            };
        });
    }

    fn is_expired(&self, credential: &Credential) -> bool {
        credential.is_expired(chrono::Duration::seconds(self.config.expiry_leeway_secs))
    }

    /// Epoch of the current session; any transition moves it on
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether no transition happened since `epoch` was read
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Tear the session down for a credential a collaborator refused outside
    /// of [`authorized`](Self::authorized)
    ///
    /// Returns false when the session already moved on from `epoch`.
    pub fn reject_credential(&self, epoch: u64, reason: &str) -> bool {
        warn!(reason = reason, "Credential rejected");
        self.expire_session(epoch, reason)
    }

    fn superseded_login() -> PerfhubError {
        debug!("Login superseded by a newer session transition");
        transient_error!("Login superseded by a newer session transition", "session_manager")
    }

    fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_modify(apply);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
