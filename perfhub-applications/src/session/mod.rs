//! Session Management Module
//!
//! Owns the client credential lifecycle, the current user and the route
//! guard, and centralizes 401 handling for authenticated calls.

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::SessionManager;
pub use storage::{FileCredentialStore, MemoryCredentialStore};
pub use types::*;
