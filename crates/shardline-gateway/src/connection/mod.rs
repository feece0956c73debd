//! Connection management
//!
//! Socket transports, per-connection heartbeat bookkeeping and the
//! session that survives across resumable reconnects.

mod heartbeat;
mod memory;
mod session;
mod transport;
mod tungstenite;

pub use heartbeat::Heartbeat;
pub use memory::{ClientFrame, MemoryConnection, MemoryServer, MemoryTransport};
pub use session::Session;
pub use transport::{GatewaySocket, Transport, TransportError, WsFrame};
pub use tungstenite::TungsteniteTransport;
