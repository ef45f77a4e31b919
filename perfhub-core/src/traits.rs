//! Contracts of the external collaborators consumed by the client core

use crate::error::PerfhubResult;
use crate::types::*;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

/// Authentication service
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange credentials for a token; bad credentials fail with `PerfhubError::Auth`
    async fn login(&self, credentials: &LoginCredentials) -> PerfhubResult<LoginResponse>;

    /// Best-effort server-side logout
    async fn logout(&self, credential: &Credential) -> PerfhubResult<()>;

    /// Current user; an invalid credential fails with `PerfhubError::Unauthorized`
    async fn me(&self, credential: &Credential) -> PerfhubResult<UserProfile>;
}

/// Client-side persisted credential plus session-scoped data
pub trait CredentialStore: Send + Sync {
    fn credential(&self) -> PerfhubResult<Option<Credential>>;

    fn store_credential(&self, credential: &Credential) -> PerfhubResult<()>;

    /// Profile cached at login, used when the current-user fetch fails transiently
    fn cached_profile(&self) -> PerfhubResult<Option<UserProfile>>;

    fn cache_profile(&self, profile: &UserProfile) -> PerfhubResult<()>;

    /// Remove the credential and every piece of session-scoped data
    fn clear(&self) -> PerfhubResult<()>;
}

/// Notification CRUD service
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn list(
        &self,
        credential: &Credential,
        filters: &NotificationFilters,
    ) -> PerfhubResult<NotificationPage>;

    async fn mark_read(&self, credential: &Credential, id: &NotificationId) -> PerfhubResult<()>;

    async fn mark_all_read(&self, credential: &Credential) -> PerfhubResult<()>;

    async fn delete(&self, credential: &Credential, id: &NotificationId) -> PerfhubResult<()>;
}

/// Query/cache layer owned by the data-fetching side
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, key: &QueryKey);
}

/// Route navigation
pub trait Navigator: Send + Sync {
    /// Navigate without adding a history entry
    fn replace(&self, route: &str);
}

/// Push channel delivering inbound events
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn connect(&self, credential: &Credential) -> PerfhubResult<ChannelSubscription>;
}

/// Why a channel stopped delivering events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTermination {
    /// Closed by its owner, or the channel gave up reconnecting
    Closed,
    /// The server refused the credential the channel was opened with
    Rejected,
}

/// Live subscription handed out by a [`RealtimeChannel`]
///
/// Events arrive in the order the channel received them. Once `events` is
/// exhausted, [`termination`](Self::termination) tells why. Dropping the
/// subscription closes the underlying connection.
pub struct ChannelSubscription {
    pub events: mpsc::Receiver<InboundEvent>,
    pub connected: watch::Receiver<bool>,
    shutdown: Option<oneshot::Sender<()>>,
    termination: oneshot::Receiver<ChannelTermination>,
    ended: Option<ChannelTermination>,
}

impl ChannelSubscription {
    /// The channel reports its end on `termination` before dropping the
    /// event sender; a sender dropped without a report means `Closed`
    pub fn new(
        events: mpsc::Receiver<InboundEvent>,
        connected: watch::Receiver<bool>,
        shutdown: oneshot::Sender<()>,
        termination: oneshot::Receiver<ChannelTermination>,
    ) -> Self {
        Self {
            events,
            connected,
            shutdown: Some(shutdown),
            termination,
            ended: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Reason the channel ended; `None` while it is still running
    pub fn termination(&mut self) -> Option<ChannelTermination> {
        if self.ended.is_none() {
            self.ended = match self.termination.try_recv() {
                Ok(reason) => Some(reason),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(ChannelTermination::Closed),
            };
        }
        self.ended
    }

    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.events.close();
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
