//! WebSocket channel.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{PlaygroundResult, TransportError};
use crate::event::StreamEvent;

use super::realtime::{Channel, ChannelKind};

/// Realtime channel over a connected WebSocket.
///
/// Text frames carry `{type, payload, timestamp}` envelopes. Binary, ping and
/// pong frames are skipped; a close frame ends the channel.
#[derive(Debug)]
pub struct WebSocketChannel<S> {
    socket: WebSocketStream<S>,
    closed: bool,
}

impl<S> WebSocketChannel<S> {
    /// Wrap an upgraded socket.
    #[must_use]
    pub const fn new(socket: WebSocketStream<S>) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl<S> Channel for WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebSocket
    }

    async fn next_event(&mut self) -> Option<PlaygroundResult<StreamEvent>> {
        if self.closed {
            return None;
        }
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => match StreamEvent::decode(text.as_str()) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err.into())),
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.closed = true;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    return Some(Err(TransportError::ChannelClosed {
                        reason: format!("websocket error: {err}"),
                    }
                    .into()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Peer may already be gone.
        let _ = self.socket.close(None).await;
    }
}
