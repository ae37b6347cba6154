//! Framing loop: raw transport chunks in, complete messages out.
//!
//! [`FrameAccumulator`] buffers chunks until one arrives with the
//! end-of-message flag, then emits the whole buffer as one [`Frame`] and
//! starts over. Partial messages never reach the session.
//!
//! [`run_framing_loop`] drives one connection: it reads chunks, dispatches
//! each complete frame to the session before reading the next chunk, and
//! closes the session when the transport ends, fails, or the session is
//! closed from elsewhere.

use crate::codec::{Frame, FrameKind};
use crate::session::Session;
use crate::transport::{Chunk, TransportReceiver};
use bytes::BytesMut;
use etpkit_types::protocol::protocols;
use etpkit_types::{EtpError, EtpResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Initial buffer capacity (4 KB).
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Reassembles chunked messages.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: BytesMut,
    kind: Option<FrameKind>,
    max_message_size: usize,
}

impl FrameAccumulator {
    /// Accumulator rejecting messages over `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            kind: None,
            max_message_size,
        }
    }

    /// Add a chunk. Returns the completed frame when the chunk ends a message.
    ///
    /// The kind of a message is the kind of its first chunk. A message
    /// growing past the size limit is a transport error; text that is not
    /// valid UTF-8 is a decode error and leaves the accumulator ready for the
    /// next message.
    pub fn push(&mut self, chunk: Chunk) -> EtpResult<Option<Frame>> {
        let size = self.buffer.len() + chunk.data.len();
        if size > self.max_message_size {
            self.reset();
            return Err(EtpError::Transport(format!(
                "Message too large: {size} bytes (max {})",
                self.max_message_size
            )));
        }

        let kind = *self.kind.get_or_insert(chunk.kind);
        self.buffer.extend_from_slice(&chunk.data);
        if !chunk.end_of_message {
            return Ok(None);
        }

        let data = self.buffer.split().freeze();
        self.kind = None;
        match kind {
            FrameKind::Binary => Ok(Some(Frame::Binary(data))),
            FrameKind::Text => String::from_utf8(data.to_vec())
                .map(|text| Some(Frame::Text(text)))
                .map_err(|e| EtpError::Decode(format!("text message is not UTF-8: {e}"))),
        }
    }

    /// Bytes buffered for the message in progress.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.kind = None;
    }
}

/// Read from `receiver` and dispatch complete messages to `session` until
/// the connection ends.
///
/// Returns `Ok(())` when the peer closes, the stream ends (including an empty
/// terminal chunk between messages), or the session is closed locally, and the
/// transport error otherwise. Either way the session is closed, which also
/// removes it from its shared registry.
pub async fn run_framing_loop<R>(session: Arc<Session>, mut receiver: R) -> EtpResult<()>
where
    R: TransportReceiver,
{
    let session_id = session.id().to_string();
    let mut accumulator = FrameAccumulator::new(session.config().max_message_size);
    debug!(session_id = %session_id, "Framing loop started");

    let (result, reason) = loop {
        let received = tokio::select! {
            _ = session.closed() => break (Ok(()), "session closed"),
            received = receiver.receive() => received,
        };

        let chunk = match received {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break (Ok(()), "connection ended"),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Transport receive failed");
                break (Err(e), "transport error");
            }
        };

        if chunk.close_requested {
            info!(session_id = %session_id, "Peer requested close");
            break (Ok(()), "closed by peer");
        }

        // An empty terminal chunk with nothing buffered signals end of stream.
        if chunk.end_of_message && chunk.data.is_empty() && accumulator.pending_len() == 0 {
            debug!(session_id = %session_id, "Empty terminal chunk");
            break (Ok(()), "connection ended");
        }

        let frame = match accumulator.push(chunk) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) if e.is_fatal() => {
                error!(session_id = %session_id, error = %e, "Dropping connection");
                break (Err(e), "transport error");
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Rejected inbound message");
                match session
                    .send_protocol_exception(protocols::CORE, e.error_code(), &e.to_string(), 0)
                    .await
                {
                    Ok(_) => continue,
                    Err(EtpError::SessionClosed) => break (Ok(()), "session closed"),
                    Err(e) => break (Err(e), "transport error"),
                }
            }
        };

        match session.dispatch(&frame).await {
            Ok(()) => {}
            Err(EtpError::SessionClosed) => break (Ok(()), "session closed"),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Dispatch failed");
                break (Err(e), "transport error");
            }
        }
    };

    session.close(reason).await;
    debug!(session_id = %session_id, reason, "Framing loop ended");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_chunks_one_message() {
        let mut acc = FrameAccumulator::new(1024);
        assert_eq!(acc.push(Chunk::text("{\"a\":1", false)).unwrap(), None);
        assert_eq!(acc.pending_len(), 6);
        let frame = acc.push(Chunk::text("}", true)).unwrap();
        assert_eq!(frame, Some(Frame::Text("{\"a\":1}".to_string())));
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_end_of_message_on_first_chunk_splits() {
        let mut acc = FrameAccumulator::new(1024);
        let chunks = [
            Chunk::text("{\"a\":1}", true),
            Chunk::text("{\"b\":", false),
            Chunk::text("2}", true),
        ];
        let frames: Vec<Frame> = chunks
            .into_iter()
            .filter_map(|c| acc.push(c).unwrap())
            .collect();
        assert_eq!(
            frames,
            vec![
                Frame::Text("{\"a\":1}".to_string()),
                Frame::Text("{\"b\":2}".to_string()),
            ]
        );
    }

    #[test]
    fn test_binary_kind_preserved() {
        let mut acc = FrameAccumulator::new(1024);
        assert!(acc.push(Chunk::binary(vec![1u8, 2], false)).unwrap().is_none());
        let frame = acc.push(Chunk::binary(vec![3u8], true)).unwrap().unwrap();
        assert_eq!(frame, Frame::Binary(vec![1u8, 2, 3].into()));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error_and_recovers() {
        let mut acc = FrameAccumulator::new(1024);
        let err = acc.push(Chunk::text(vec![0xffu8, 0xfe], true)).unwrap_err();
        assert!(matches!(err, EtpError::Decode(_)));
        let frame = acc.push(Chunk::text("ok", true)).unwrap();
        assert_eq!(frame, Some(Frame::Text("ok".to_string())));
    }

    #[test]
    fn test_oversized_message_is_fatal() {
        let mut acc = FrameAccumulator::new(8);
        assert!(acc.push(Chunk::binary(vec![0u8; 6], false)).unwrap().is_none());
        let err = acc.push(Chunk::binary(vec![0u8; 6], true)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(acc.pending_len(), 0);
    }
}
