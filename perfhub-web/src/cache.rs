//! Query cache invalidation for fetched server data
//!
//! The client keeps no query results of its own; views that hold fetched data
//! subscribe here and refetch whenever an announced key prefixes one of theirs.

use perfhub_core::{QueryCache, QueryKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// [`QueryCache`] that announces invalidated keys to subscribers
#[derive(Debug, Clone)]
pub struct BroadcastQueryCache {
    invalidations: Arc<AtomicU64>,
    invalidated: broadcast::Sender<QueryKey>,
}

impl BroadcastQueryCache {
    /// `capacity` bounds how far a slow subscriber may lag before it misses keys
    pub fn new(capacity: usize) -> Self {
        let (invalidated, _) = broadcast::channel(capacity.max(1));
        Self {
            invalidations: Arc::new(AtomicU64::new(0)),
            invalidated,
        }
    }

    /// Keys announced by [`QueryCache::invalidate`], in call order
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.invalidated.subscribe()
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Whether invalidating `announced` makes data held under `held` stale
    pub fn is_stale(announced: &QueryKey, held: &QueryKey) -> bool {
        announced.is_prefix_of(held)
    }
}

impl Default for BroadcastQueryCache {
    fn default() -> Self {
        Self::new(64)
    }
}

impl QueryCache for BroadcastQueryCache {
    fn invalidate(&self, key: &QueryKey) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.invalidated.send(key.clone()).unwrap_or(0);
        debug!(key = %key, subscribers = subscribers, "Query cache invalidated");
    }
}
