//! tokio-tungstenite transport used against the real gateway.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{GatewaySocket, Transport, TransportError, WsFrame};

/// Connects over `ws://` or `wss://` (rustls)
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewaySocket>, TransportError> {
        let (stream, response) = connect_async(url).await.map_err(|e| TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(url = %url, status = %response.status(), "WebSocket connected");

        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl GatewaySocket for TungsteniteSocket {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WsFrame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(WsFrame::Text(text))),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(WsFrame::Text(text))),
                    Err(_) => {
                        tracing::warn!("Dropping non UTF-8 binary frame");
                    }
                },
                Message::Close(frame) => {
                    return Some(Ok(WsFrame::Close(frame.map(|f| u16::from(f.code)))));
                }
                // Ping/pong are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
