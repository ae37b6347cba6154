//! Transport contract consumed by the session and the framing loop.
//!
//! A transport is split into a sending half, owned by the session behind its
//! send gate, and a receiving half, owned by the framing loop. Receiving
//! yields raw chunks; a logical message may span several chunks and ends with
//! the chunk whose `end_of_message` flag is set.

pub mod websocket;

use crate::codec::{Frame, FrameKind};
use async_trait::async_trait;
use bytes::Bytes;
use etpkit_types::EtpResult;

/// One piece of a logical message as read from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Bytes,
    pub end_of_message: bool,
    pub kind: FrameKind,
    /// The peer asked to close the connection; `data` is not part of a message.
    pub close_requested: bool,
}

impl Chunk {
    pub fn binary(data: impl Into<Bytes>, end_of_message: bool) -> Self {
        Self {
            data: data.into(),
            end_of_message,
            kind: FrameKind::Binary,
            close_requested: false,
        }
    }

    pub fn text(data: impl Into<Bytes>, end_of_message: bool) -> Self {
        Self {
            data: data.into(),
            end_of_message,
            kind: FrameKind::Text,
            close_requested: false,
        }
    }

    pub fn close() -> Self {
        Self {
            data: Bytes::new(),
            end_of_message: true,
            kind: FrameKind::Binary,
            close_requested: true,
        }
    }
}

/// Sending half of a connection.
#[async_trait]
pub trait TransportSender: Send + 'static {
    /// Write one complete message. May wait until it is flushed.
    async fn send(&mut self, frame: Frame) -> EtpResult<()>;

    /// Close the connection, telling the peer why.
    async fn close(&mut self, reason: &str) -> EtpResult<()>;
}

/// Receiving half of a connection.
#[async_trait]
pub trait TransportReceiver: Send + 'static {
    /// Read the next chunk. `None` means the stream has ended.
    async fn receive(&mut self) -> EtpResult<Option<Chunk>>;
}
