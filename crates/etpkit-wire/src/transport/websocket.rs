//! WebSocket transport over `tokio-tungstenite`.
//!
//! tungstenite reassembles fragmented WebSocket frames itself, so every
//! chunk produced here is a complete message with `end_of_message` set.
//! Ping and pong frames are answered by tungstenite and never surface.

use super::{Chunk, TransportReceiver, TransportSender};
use crate::codec::Frame;
use async_trait::async_trait;
use bytes::Bytes;
use etpkit_types::{EtpError, EtpResult};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// WebSocket subprotocol announced by clients and echoed by servers.
pub const ETP_SUBPROTOCOL: &str = "etp12.energistics.org";

/// Sending half of a WebSocket connection.
pub struct WebSocketSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Receiving half of a WebSocket connection.
pub struct WebSocketReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Split an upgraded WebSocket into transport halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (WebSocketSender<S>, WebSocketReceiver<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (WebSocketSender { sink }, WebSocketReceiver { stream })
}

fn transport_error(e: WsError) -> EtpError {
    EtpError::Transport(e.to_string())
}

#[async_trait]
impl<S> TransportSender for WebSocketSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> EtpResult<()> {
        let message = match frame {
            Frame::Binary(bytes) => Message::Binary(bytes.to_vec()),
            Frame::Text(text) => Message::Text(text),
        };
        self.sink.send(message).await.map_err(transport_error)
    }

    async fn close(&mut self, reason: &str) -> EtpResult<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        match self.sink.send(Message::Close(Some(frame))).await {
            Ok(()) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                debug!("WebSocket already closed");
                return Ok(());
            }
            Err(e) => return Err(transport_error(e)),
        }
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(transport_error(e)),
        }
    }
}

#[async_trait]
impl<S> TransportReceiver for WebSocketReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> EtpResult<Option<Chunk>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(m)) => m,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(transport_error(e)),
            };

            return Ok(Some(match message {
                Message::Binary(data) => Chunk::binary(Bytes::from(data), true),
                Message::Text(text) => Chunk::text(Bytes::from(text.into_bytes()), true),
                Message::Close(frame) => {
                    debug!(?frame, "WebSocket close received");
                    Chunk::close()
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }));
        }
    }
}
