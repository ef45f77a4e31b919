//! Permission System
//!
//! Permissions are opaque capability tokens granted by the server. A single
//! override token satisfies every check.

use perfhub_core::UserProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default override-all token
pub const DEFAULT_OVERRIDE_PERMISSION: &str = "system_admin";

/// Capability tokens held by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    tokens: HashSet<String>,
    override_token: String,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::empty(DEFAULT_OVERRIDE_PERMISSION)
    }
}

impl PermissionSet {
    /// Create a permission set from granted tokens
    pub fn new<I, S>(tokens: I, override_token: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            override_token: override_token.into(),
        }
    }

    /// A set that grants nothing
    pub fn empty(override_token: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new(), override_token)
    }

    /// Permissions of a user profile
    pub fn for_user(user: &UserProfile, override_token: impl Into<String>) -> Self {
        Self::new(user.permissions.iter().cloned(), override_token)
    }

    /// Whether the override token is granted
    pub fn is_superuser(&self) -> bool {
        self.tokens.contains(&self.override_token)
    }

    /// Check a single permission
    pub fn has(&self, permission: &str) -> bool {
        self.is_superuser() || self.tokens.contains(permission)
    }

    /// Check if every listed permission is held
    pub fn has_all(&self, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has(p))
    }

    /// Check if any of the listed permissions is held
    pub fn has_any(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has(p))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Granted tokens in sorted order
    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.tokens.iter().map(String::as_str).collect();
        tokens.sort_unstable();
        tokens
    }
}
