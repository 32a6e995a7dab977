//! Connection Channel
//!
//! Typed message transport over one WebSocket connection. Owns the only
//! handle to the underlying stream: everything above this layer sees
//! [`Message`] values, never bytes.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::net::frame::DecodeError;
use crate::net::protocol::{EncodeError, Message};

/// Channel transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection is closed; no further sends are possible.
    #[error("connection closed")]
    Closed,

    /// Outbound message failed to encode.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Underlying WebSocket failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A typed channel over a WebSocket stream.
///
/// Generic over the transport so tests can run it over an in-memory duplex
/// pipe instead of TCP.
pub struct Channel<S> {
    inner: WebSocketStream<S>,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established WebSocket stream.
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }

    /// Encode and send one message.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ChannelError> {
        let bytes = msg.encode()?;
        self.inner.send(WsMessage::Binary(bytes)).await?;
        Ok(())
    }

    /// Receive the next message.
    ///
    /// Returns `None` exactly once, when the connection has closed; after
    /// that the channel is spent. Transport pings are answered here and
    /// never surface. A decode failure is reported without consuming the
    /// connection, but the caller is expected to treat it as fatal.
    pub async fn recv(&mut self) -> Option<Result<Message, DecodeError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => return Some(Message::decode(&bytes)),
                Some(Ok(WsMessage::Text(_))) => {
                    // The protocol is binary-only; a text frame means the
                    // peer is not speaking it.
                    return Some(Err(DecodeError::MalformedFrame(
                        "text frame on binary protocol".to_string(),
                    )));
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    if self.inner.send(WsMessage::Pong(payload)).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    debug!("websocket read failed: {e}");
                    return None;
                }
            }
        }
    }

    /// Close the connection. Best effort; the peer may already be gone.
    pub async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::ControlMessage;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn duplex_pair() -> (
        Channel<tokio::io::DuplexStream>,
        Channel<tokio::io::DuplexStream>,
    ) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server =
            WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client =
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (Channel::new(server), Channel::new(client))
    }

    #[tokio::test]
    async fn test_send_recv_round_trip() {
        let (mut server, mut client) = duplex_pair().await;

        client
            .send(&Message::Control(ControlMessage::Heartbeat))
            .await
            .unwrap();

        let received = server.recv().await.unwrap().unwrap();
        assert_eq!(received, Message::Control(ControlMessage::Heartbeat));
    }

    #[tokio::test]
    async fn test_text_frame_is_protocol_violation() {
        let (mut server, client) = duplex_pair().await;
        let mut raw_client = client.inner;

        raw_client
            .send(WsMessage::Text("hello".to_string()))
            .await
            .unwrap();

        let received = server.recv().await.unwrap();
        assert!(matches!(received, Err(DecodeError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn test_recv_none_after_close() {
        let (mut server, mut client) = duplex_pair().await;
        client.close().await;
        assert!(server.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_binary_reports_decode_error() {
        let (mut server, client) = duplex_pair().await;
        let mut raw_client = client.inner;

        raw_client
            .send(WsMessage::Binary(vec![0xDE, 0xAD]))
            .await
            .unwrap();

        let received = server.recv().await.unwrap();
        assert_eq!(received, Err(DecodeError::TruncatedPayload));
    }

    #[tokio::test]
    async fn test_ping_is_answered_transparently() {
        let (mut server, client) = duplex_pair().await;
        let mut raw_client = client.inner;

        raw_client.send(WsMessage::Ping(vec![1, 2, 3])).await.unwrap();
        raw_client
            .send(
                WsMessage::Binary(
                    Message::Control(ControlMessage::Leave).encode().unwrap(),
                ),
            )
            .await
            .unwrap();

        // The ping never surfaces; the next real message does.
        let received = server.recv().await.unwrap().unwrap();
        assert_eq!(received, Message::Control(ControlMessage::Leave));
    }
}
