//! Frame encoding and decoding.
//!
//! A frame is one complete logical WebSocket message. With the binary
//! encoding it holds a MessagePack header immediately followed by a
//! MessagePack body in a binary frame. With the JSON encoding it holds the
//! two-element array `[header, body]` in a text frame.
//!
//! Decoding is two-phase: [`Codec::decode`] reads only the header, so the
//! session can route the frame, and the owning handler later decodes the
//! [`MessageBody`] into the record type it expects for the message type.

use bytes::Bytes;
use etpkit_types::config::Encoding;
use etpkit_types::{EtpError, EtpResult, MessageHeader};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Transport-level classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Binary,
    Text,
}

/// A complete logical message as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Binary(_) => FrameKind::Binary,
            Self::Text(_) => FrameKind::Text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary(b) => b.len(),
            Self::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Undecoded body of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Remaining bytes after the binary header.
    Binary(Bytes),
    /// Second element of a JSON frame.
    Json(serde_json::Value),
}

impl MessageBody {
    /// Decode the body into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> EtpResult<T> {
        match self {
            Self::Binary(bytes) => {
                rmp_serde::from_slice(bytes).map_err(|e| EtpError::Decode(e.to_string()))
            }
            Self::Json(value) => T::deserialize(value).map_err(|e| EtpError::Decode(e.to_string())),
        }
    }
}

/// Encoder/decoder for one wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    encoding: Encoding,
}

impl Codec {
    /// Codec that writes `encoding`.
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// Encoding used for outgoing frames.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Serialize a header and body into one outgoing frame.
    pub fn encode<T>(&self, header: &MessageHeader, body: &T) -> EtpResult<Frame>
    where
        T: Serialize + ?Sized,
    {
        match self.encoding {
            Encoding::Binary => {
                let mut buf =
                    rmp_serde::to_vec(header).map_err(|e| EtpError::Encode(e.to_string()))?;
                rmp_serde::encode::write(&mut buf, body)
                    .map_err(|e| EtpError::Encode(e.to_string()))?;
                Ok(Frame::Binary(Bytes::from(buf)))
            }
            Encoding::Json => {
                let text = serde_json::to_string(&(header, body))
                    .map_err(|e| EtpError::Encode(e.to_string()))?;
                Ok(Frame::Text(text))
            }
        }
    }

    /// Read the header of an inbound frame and split off its body.
    ///
    /// The frame kind decides the decoding, so a peer may answer in either
    /// encoding regardless of what this side sends.
    pub fn decode(frame: &Frame) -> EtpResult<(MessageHeader, MessageBody)> {
        match frame {
            Frame::Binary(bytes) => {
                let mut cursor: &[u8] = bytes;
                let header: MessageHeader = rmp_serde::from_read(&mut cursor)
                    .map_err(|e| EtpError::Decode(format!("invalid header: {e}")))?;
                let consumed = bytes.len() - cursor.len();
                Ok((header, MessageBody::Binary(bytes.slice(consumed..))))
            }
            Frame::Text(text) => {
                let (header, body): (MessageHeader, serde_json::Value) =
                    serde_json::from_str(text)
                        .map_err(|e| EtpError::Decode(format!("invalid message: {e}")))?;
                Ok((header, MessageBody::Json(body)))
            }
        }
    }
}

/// A decoded header/body pair, used when the whole message is needed at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub header: MessageHeader,
    pub body: T,
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decode a frame whose body type is known up front.
    pub fn from_frame(frame: &Frame) -> EtpResult<Self> {
        let (header, body) = Codec::decode(frame)?;
        Ok(Self {
            header,
            body: body.decode()?,
        })
    }
}
