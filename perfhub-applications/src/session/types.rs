//! Session Types and Structures
//!
//! Read-only views of the client session published by the session manager.

use perfhub_core::UserProfile;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of the client session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
    LoggingOut,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Uninitialized => write!(f, "uninitialized"),
            SessionPhase::Loading => write!(f, "loading"),
            SessionPhase::Authenticated => write!(f, "authenticated"),
            SessionPhase::Unauthenticated => write!(f, "unauthenticated"),
            SessionPhase::LoggingOut => write!(f, "logging_out"),
        }
    }
}

/// Snapshot of the session state
///
/// `user` is never set while `credential_present` is false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub credential_present: bool,
    pub credential_expired: bool,
    pub loading: bool,
    pub logging_out: bool,
    pub phase: SessionPhase,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated && self.user.is_some()
    }

    /// Whether a guard decision has to wait
    pub fn is_settling(&self) -> bool {
        self.loading || self.logging_out
    }
}

/// One-shot session signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: String },
    LoggedOut,
    /// The credential expired or was rejected by the server
    Expired,
}

/// Outcome of a route guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session state is still settling; render a placeholder
    Pending { logging_out: bool },
    RedirectToLogin,
    Allow,
}

impl GuardDecision {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if snapshot.is_settling() {
            GuardDecision::Pending {
                logging_out: snapshot.logging_out,
            }
        } else if snapshot.is_authenticated() {
            GuardDecision::Allow
        } else {
            GuardDecision::RedirectToLogin
        }
    }
}
