//! PerfHub Applications - Session and notification services
//!
//! This module provides the stateful client services that build upon the
//! contracts defined in perfhub-core. It includes:
//!
//! - Session management: credential lifecycle, current user, route guarding
//! - Permission predicates with a configurable override token
//! - The realtime notification relay and its local notification state
//!
//! ## Architecture
//!
//! Services are explicit objects with injected collaborators:
//! - **Contracts** (perfhub-core): domain types and collaborator traits
//! - **Services** (this module): `SessionManager`, `NotificationRelay`
//! - **Adapters** (perfhub-web/cli): HTTP, WebSocket, cache and navigation

pub mod auth;
pub mod notifications;
pub mod session;

pub use auth::PermissionSet;
pub use notifications::{NotificationRelay, NotificationStore, RelayUpdate};
pub use session::{
    FileCredentialStore, GuardDecision, MemoryCredentialStore, SessionEvent, SessionManager,
    SessionPhase, SessionSnapshot,
};

pub use perfhub_core::{PerfhubError, PerfhubResult};
