//! Notifications Module
//!
//! Local notification state and the realtime relay that keeps it current.

pub mod relay;
pub mod store;

pub use relay::{NotificationRelay, RelayUpdate};
pub use store::NotificationStore;
