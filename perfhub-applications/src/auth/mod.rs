//! Authorization Module
//!
//! Capability-token permission checks for the signed-in user.

pub mod permissions;

pub use permissions::PermissionSet;
