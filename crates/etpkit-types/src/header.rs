//! Message header and message flags.
//!
//! Every frame on the wire starts with a [`MessageHeader`] naming the protocol
//! and message type of the body that follows, the sender-assigned message id,
//! and the id of the request it answers (if any).

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Bitset of per-message flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFlags(i32);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    /// One part of a response that spans several messages.
    pub const MULTI_PART: Self = Self(0x1);
    /// Last message of a response sequence.
    pub const FINAL_PART: Self = Self(0x2);
    /// The request matched nothing; no payload follows.
    pub const NO_DATA: Self = Self(0x4);
    /// The body is compressed.
    pub const COMPRESSED: Self = Self(0x8);
    /// The sender asks for an Acknowledge.
    pub const ACKNOWLEDGE: Self = Self(0x10);
    /// Shorthand for the last part of a multi-part response.
    pub const MULTI_PART_AND_FINAL_PART: Self = Self(0x3);

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How a response relates to the rest of its response sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Last message for the correlated request.
    Final,
    /// More parts follow.
    Continuation,
    /// Carries neither the final nor the multi-part flag.
    Ambiguous,
}

/// Header preceding every message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Protocol number the body belongs to.
    pub protocol: i32,
    /// Message type within the protocol.
    pub message_type: i32,
    /// Sender-assigned id; zero until the session sends the message.
    pub message_id: i64,
    /// Id of the request this message answers, zero if unsolicited.
    pub correlation_id: i64,
    /// Raw flag bits.
    pub message_flags: MessageFlags,
}

impl MessageHeader {
    /// Build an outgoing header. The message id is left at zero; the session
    /// assigns it immediately before the frame is sent.
    pub fn new(
        protocol: i32,
        message_type: i32,
        correlation_id: i64,
        message_flags: MessageFlags,
    ) -> Self {
        Self {
            protocol,
            message_type,
            message_id: 0,
            correlation_id,
            message_flags,
        }
    }

    pub fn is_final_response(&self) -> bool {
        self.message_flags.contains(MessageFlags::FINAL_PART)
    }

    /// True for a non-final part of a multi-part response.
    pub fn is_multi_part(&self) -> bool {
        self.message_flags.contains(MessageFlags::MULTI_PART) && !self.is_final_response()
    }

    pub fn is_no_data(&self) -> bool {
        self.message_flags.contains(MessageFlags::NO_DATA)
    }

    pub fn acknowledge_requested(&self) -> bool {
        self.message_flags.contains(MessageFlags::ACKNOWLEDGE)
    }

    /// Classify this message within its response sequence.
    ///
    /// A no-data answer ends the exchange even without the final flag.
    pub fn response_kind(&self) -> ResponseKind {
        if self.is_final_response() || self.is_no_data() {
            ResponseKind::Final
        } else if self.is_multi_part() {
            ResponseKind::Continuation
        } else {
            ResponseKind::Ambiguous
        }
    }
}
