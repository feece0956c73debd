//! In-process transport: every `connect` hands a [`MemoryConnection`] to a
//! [`MemoryServer`], which plays the gateway side. Used by tests and by
//! embedders that want to drive shards without a network.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{GatewaySocket, Transport, TransportError, WsFrame};
use crate::protocol::{GatewayMessage, OpCode};

/// What the client wrote to its socket
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Message(GatewayMessage),
    /// Undecodable text, kept verbatim
    Raw(String),
    Close(u16),
}

/// Client side factory
#[derive(Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryConnection>,
    refuse_next: Arc<AtomicU32>,
}

/// Server side acceptor
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryConnection>,
}

/// Server end of one connection
pub struct MemoryConnection {
    /// URL the client connected to, query included
    pub url: String,
    to_client: mpsc::UnboundedSender<WsFrame>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse_next: Arc::new(AtomicU32::new(0)),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Make the next `count` connection attempts fail
    pub fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewaySocket>, TransportError> {
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let connection = MemoryConnection {
            url: url.to_string(),
            to_client,
            from_client,
        };

        self.accept_tx
            .send(connection)
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                reason: "server is gone".to_string(),
            })?;

        Ok(Box::new(MemorySocket { incoming, outgoing }))
    }
}

struct MemorySocket {
    incoming: mpsc::UnboundedReceiver<WsFrame>,
    outgoing: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl GatewaySocket for MemorySocket {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let frame = match GatewayMessage::decode(&text) {
            Ok(message) => ClientFrame::Message(message),
            Err(_) => ClientFrame::Raw(text),
        };
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Send("peer hung up".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WsFrame, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
        self.incoming.close();
        self.outgoing
            .send(ClientFrame::Close(code))
            .map_err(|_| TransportError::Send("peer hung up".to_string()))
    }
}

impl MemoryServer {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.accept_rx.recv().await
    }
}

impl MemoryConnection {
    pub fn send(&self, message: &GatewayMessage) {
        if let Ok(text) = message.to_json() {
            let _ = self.to_client.send(WsFrame::Text(text));
        }
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.to_client.send(WsFrame::Text(text.into()));
    }

    pub fn hello(&self, heartbeat_interval: u64) {
        self.send(&GatewayMessage::hello(heartbeat_interval));
    }

    pub fn dispatch(&self, event: &str, sequence: u64, data: Value) {
        self.send(&GatewayMessage::dispatch(event, sequence, data));
    }

    /// Close the connection from the server side with `code`
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(WsFrame::Close(Some(code)));
    }

    /// Next frame written by the client, `None` once it dropped the socket
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }

    /// Next client message with `op`, skipping everything else except closes
    ///
    /// Returns `Err(code)` if the client closed the socket first.
    pub async fn expect_op(&mut self, op: OpCode) -> Result<GatewayMessage, Option<u16>> {
        loop {
            match self.recv().await {
                Some(ClientFrame::Message(message)) if message.op == op => return Ok(message),
                Some(ClientFrame::Close(code)) => return Err(Some(code)),
                Some(_) => {}
                None => return Err(None),
            }
        }
    }

    /// Like [`Self::expect_op`] but answers heartbeats while waiting
    pub async fn expect_op_acking(&mut self, op: OpCode) -> Result<GatewayMessage, Option<u16>> {
        loop {
            match self.recv().await {
                Some(ClientFrame::Message(message)) if message.op == op => return Ok(message),
                Some(ClientFrame::Message(message)) if message.op == OpCode::Heartbeat => {
                    self.send(&GatewayMessage::heartbeat_ack());
                }
                Some(ClientFrame::Close(code)) => return Err(Some(code)),
                Some(_) => {}
                None => return Err(None),
            }
        }
    }

    /// Wait until the client closes, returning its close code
    pub async fn expect_close(&mut self) -> Option<u16> {
        loop {
            match self.recv().await {
                Some(ClientFrame::Close(code)) => return Some(code),
                Some(_) => {}
                None => return None,
            }
        }
    }
}
