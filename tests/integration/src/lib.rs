//! Integration test utilities
//!
//! A local axum server plays both the gateway (WebSocket) and the REST API
//! so the real tokio-tungstenite and reqwest transports can be exercised
//! end to end.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
