//! Realtime notification relay
//!
//! A single worker task follows the session: while a user is signed in it
//! holds a channel subscription and applies inbound events in arrival order;
//! when the session ends it drops the subscription and clears local state.
//! A channel that ends because the server refused the credential ends the
//! session the same way a 401 does.

use super::NotificationStore;
use crate::session::{SessionManager, SessionSnapshot};
use futures::FutureExt;
use perfhub_core::{
    retry_async, ChannelTermination, InboundEvent, Notification, NotificationConfig,
    NotificationFilters, NotificationId, NotificationService, PerfhubResult, QueryCache, QueryKey,
    RealtimeChannel,
};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Change notifications for toast-style consumers
#[derive(Debug, Clone, PartialEq)]
pub enum RelayUpdate {
    Received(Notification),
    MarkedRead(NotificationId),
    AllMarkedRead,
    Removed(NotificationId),
    Loaded { count: usize, unread_count: u32 },
    Cleared,
    Connection(bool),
}

/// Why the event pump returned
enum PumpExit {
    Shutdown,
    SessionEnded,
    ChannelClosed,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct NotificationRelay {
    session: SessionManager,
    channel: Arc<dyn RealtimeChannel>,
    service: Arc<dyn NotificationService>,
    cache: Arc<dyn QueryCache>,
    config: NotificationConfig,
    store: Arc<RwLock<NotificationStore>>,
    connected: Arc<watch::Sender<bool>>,
    updates: broadcast::Sender<RelayUpdate>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl NotificationRelay {
    pub fn new(
        session: SessionManager,
        channel: Arc<dyn RealtimeChannel>,
        service: Arc<dyn NotificationService>,
        cache: Arc<dyn QueryCache>,
        config: NotificationConfig,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        let (updates, _) = broadcast::channel(128);

        Self {
            session,
            channel,
            service,
            cache,
            config,
            store: Arc::new(RwLock::new(NotificationStore::new())),
            connected: Arc::new(connected),
            updates,
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch the connection flag
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn updates(&self) -> broadcast::Receiver<RelayUpdate> {
        self.updates.subscribe()
    }

    /// Local notifications, newest first
    pub async fn notifications(&self) -> Vec<Notification> {
        self.store.read().await.to_vec()
    }

    pub async fn unread_count(&self) -> u32 {
        self.store.read().await.unread_count()
    }

    /// Case-insensitive title/message search over local notifications
    pub async fn search(&self, query: &str) -> Vec<Notification> {
        self.store.read().await.search(query)
    }

    /// Apply one inbound channel event
    pub async fn on_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::NewNotification { notification } => {
                debug!(
                    id = %notification.id,
                    kind = %notification.notification_type,
                    "New notification"
                );
                let keys = notification.notification_type.invalidation_keys();
                self.store.write().await.add(notification.clone());
                for key in &keys {
                    self.cache.invalidate(key);
                }
                self.publish(RelayUpdate::Received(notification));
            }
            InboundEvent::MarkedRead { notification_id } => {
                if self.store.write().await.mark_as_read(&notification_id) {
                    self.publish(RelayUpdate::MarkedRead(notification_id));
                } else {
                    debug!(id = %notification_id, "Read marker for unknown or read notification");
                }
            }
        }
    }

    pub async fn add_notification(&self, notification: Notification) {
        self.store.write().await.add(notification.clone());
        self.publish(RelayUpdate::Received(notification));
    }

    pub async fn mark_as_read(&self, id: &NotificationId) {
        if self.store.write().await.mark_as_read(id) {
            self.publish(RelayUpdate::MarkedRead(id.clone()));
        }
    }

    pub async fn mark_all_as_read(&self) {
        self.store.write().await.mark_all_as_read();
        self.publish(RelayUpdate::AllMarkedRead);
    }

    pub async fn remove_notification(&self, id: &NotificationId) {
        if self.store.write().await.remove(id).is_some() {
            self.publish(RelayUpdate::Removed(id.clone()));
        }
    }

    pub async fn set_initial_notifications(
        &self,
        notifications: Vec<Notification>,
        unread_count: u32,
    ) {
        let count = notifications.len();
        self.store
            .write()
            .await
            .set_initial(notifications, unread_count);
        self.publish(RelayUpdate::Loaded {
            count,
            unread_count,
        });
    }

    /// Fetch a page from the server and replace local state with it
    ///
    /// Returns how many notifications were applied. A page that arrives after
    /// the session it was requested for has ended is dropped and counts as 0.
    pub async fn load_initial(&self, filters: &NotificationFilters) -> PerfhubResult<usize> {
        let epoch = self.session.epoch();
        let service = Arc::clone(&self.service);
        let filters = filters.clone();
        let page = self
            .session
            .authorized("list_notifications", |credential| async move {
                service.list(&credential, &filters).await
            })
            .await?;

        let count = page.notifications.len();
        let unread_count = page.unread_count;
        {
            // Checked under the store lock so a concurrent reset lands after us
            let mut store = self.store.write().await;
            if !self.session.is_current(epoch) || !self.session.snapshot().is_authenticated() {
                debug!(count = count, "Discarding notifications fetched for an ended session");
                return Ok(0);
            }
            store.set_initial(page.notifications, unread_count);
        }

        self.publish(RelayUpdate::Loaded {
            count,
            unread_count,
        });
        info!(count = count, "Loaded notifications");
        Ok(count)
    }

    /// Mark read locally, then on the server; failures do not roll back
    pub async fn submit_mark_as_read(&self, id: &NotificationId) -> PerfhubResult<()> {
        self.mark_as_read(id).await;

        let service = Arc::clone(&self.service);
        let target = id.clone();
        self.session
            .authorized("mark_notification_read", |credential| async move {
                service.mark_read(&credential, &target).await
            })
            .await?;

        self.cache.invalidate(&QueryKey::notifications());
        Ok(())
    }

    pub async fn submit_mark_all_as_read(&self) -> PerfhubResult<()> {
        self.mark_all_as_read().await;

        let service = Arc::clone(&self.service);
        self.session
            .authorized("mark_all_notifications_read", |credential| async move {
                service.mark_all_read(&credential).await
            })
            .await?;

        self.cache.invalidate(&QueryKey::notifications());
        Ok(())
    }

    pub async fn submit_delete(&self, id: &NotificationId) -> PerfhubResult<()> {
        self.remove_notification(id).await;

        let service = Arc::clone(&self.service);
        let target = id.clone();
        self.session
            .authorized("delete_notification", |credential| async move {
                service.delete(&credential, &target).await
            })
            .await?;

        self.cache.invalidate(&QueryKey::notifications());
        Ok(())
    }

    /// Spawn the worker; a second call while running is a no-op
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!("Notification relay already running");
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let relay = self.clone();
        let handle = tokio::spawn(async move { relay.run(shutdown_rx).await });

        *worker = Some(Worker { shutdown, handle });
        info!("Notification relay started");
    }

    /// Stop the worker and drop the channel subscription
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(());
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Notification relay worker ended abnormally");
            }
            info!("Notification relay stopped");
        }
        self.set_connected(false);
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut session = self.session.subscribe();

        loop {
            let snapshot: SessionSnapshot = session.borrow_and_update().clone();
            if !snapshot.is_authenticated() {
                self.reset().await;
                tokio::select! {
                    _ = &mut shutdown => break,
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let epoch = self.session.epoch();
            let channel = Arc::clone(&self.channel);
            let connected = self
                .session
                .authorized("realtime_connect", |credential| async move {
                    channel.connect(&credential).await
                })
                .await;

            let mut subscription = match connected {
                Ok(subscription) => subscription,
                Err(e) => {
                    e.log();
                    if !Self::wait_for_session_change(&mut session, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if self.config.fetch_on_connect {
                tokio::select! {
                    _ = &mut shutdown => break,
                    fetched = self.fetch_first_page() => {
                        if let Err(e) = fetched {
                            warn!(error = %e, "Initial notification fetch failed");
                        }
                    }
                }
            }

            self.set_connected(subscription.is_connected());

            let exit = {
                let subscription = &mut subscription;
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break PumpExit::Shutdown,
                        changed = session.changed() => {
                            if changed.is_err() {
                                break PumpExit::Shutdown;
                            }
                            if !session.borrow_and_update().is_authenticated() {
                                break PumpExit::SessionEnded;
                            }
                        }
                        event = subscription.events.recv() => match event {
                            Some(event) => self.on_event(event).await,
                            None => break PumpExit::ChannelClosed,
                        },
                        changed = subscription.connected.changed() => {
                            if changed.is_err() {
                                break PumpExit::ChannelClosed;
                            }
                            let is_connected = *subscription.connected.borrow_and_update();
                            self.set_connected(is_connected);
                        }
                    }
                }
            };

            subscription.close();
            self.set_connected(false);

            match exit {
                PumpExit::Shutdown => break,
                PumpExit::SessionEnded => continue,
                PumpExit::ChannelClosed => {
                    if subscription.termination() == Some(ChannelTermination::Rejected) {
                        self.session
                            .reject_credential(epoch, "realtime channel rejected the credential");
                        continue;
                    }
                    warn!("Realtime channel closed");
                    if !Self::wait_for_session_change(&mut session, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_connected(false);
        debug!("Notification relay worker exited");
    }

    /// First page after connecting, retried while failures are recoverable
    async fn fetch_first_page(&self) -> PerfhubResult<usize> {
        let filters = NotificationFilters {
            limit: Some(self.config.page_size),
            ..Default::default()
        };
        let relay = self.clone();

        retry_async(
            move || {
                let relay = relay.clone();
                let filters = filters.clone();
                async move { relay.load_initial(&filters).await }.boxed()
            },
            self.config.fetch_retry.clone(),
            "initial_notification_fetch",
        )
        .await
    }

    /// Returns false when the worker should exit
    async fn wait_for_session_change(
        session: &mut watch::Receiver<SessionSnapshot>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> bool {
        tokio::select! {
            _ = shutdown => false,
            changed = session.changed() => changed.is_ok(),
        }
    }

    async fn reset(&self) {
        let mut store = self.store.write().await;
        if !store.is_empty() || store.unread_count() > 0 {
            store.clear();
            drop(store);
            self.publish(RelayUpdate::Cleared);
        }
        self.set_connected(false);
    }

    fn set_connected(&self, is_connected: bool) {
        let changed = self.connected.send_if_modified(|current| {
            if *current == is_connected {
                false
            } else {
                *current = is_connected;
                true
            }
        });
        if changed {
            debug!(connected = is_connected, "Realtime connection changed");
            self.publish(RelayUpdate::Connection(is_connected));
        }
    }

    fn publish(&self, update: RelayUpdate) {
        let _ = self.updates.send(update);
    }
}
