//! Socket abstraction the shard runs on.

use async_trait::async_trait;

/// Inbound frame after transport-level noise (ping/pong) is stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    /// Peer closed; `None` when the close frame carried no code
    Close(Option<u16>),
}

/// Transport failures. All of them are transient from the shard's point of view.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),
}

/// Opens gateway sockets
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewaySocket>, TransportError>;
}

/// One open gateway socket
///
/// `recv` must be cancel-safe: the shard polls it inside `select!`.
#[async_trait]
pub trait GatewaySocket: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame, or `None` once the socket is gone
    async fn recv(&mut self) -> Option<Result<WsFrame, TransportError>>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}
