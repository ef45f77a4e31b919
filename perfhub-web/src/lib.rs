//! PerfHub Web - Transport adapters for the PerfHub client
//!
//! This crate implements the collaborator contracts from `perfhub-core`
//! against the PerfHub backend:
//! - [`HttpApiClient`]: REST auth and notification endpoints (reqwest)
//! - [`WebSocketChannel`]: realtime event push (tokio-tungstenite)
//! - [`BroadcastQueryCache`]: query invalidation announced to subscribers

pub mod cache;
pub mod http;
pub mod websocket;

pub use cache::BroadcastQueryCache;
pub use http::HttpApiClient;
pub use websocket::WebSocketChannel;

// Re-export commonly used types
pub use perfhub_core::{PerfhubError, PerfhubResult};
