//! Shared error types for the etpkit engine.

use crate::protocol::ErrorCode;
use thiserror::Error;

/// Top-level error type for sessions, handlers and transports.
#[derive(Error, Debug)]
pub enum EtpError {
    /// No handler is registered for the protocol named in a header.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(i32),

    /// The handler for a protocol has no case for the message type.
    #[error("Invalid message type {message_type} for protocol {protocol}")]
    InvalidMessageType {
        /// Protocol of the offending message.
        protocol: i32,
        /// Message type that was not recognized.
        message_type: i32,
    },

    /// A payload or header could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A record could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A send or dispatch was attempted on a session that is not open.
    #[error("Session closed")]
    SessionClosed,

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session or registry was configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A caller-supplied argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtpError {
    /// The protocol error code reported to the peer for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedProtocol(_) => ErrorCode::UnsupportedProtocol,
            Self::InvalidMessageType { .. } => ErrorCode::InvalidMessageType,
            Self::Decode(_) | Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidState(_) | Self::SessionClosed => ErrorCode::InvalidState,
            Self::Encode(_) | Self::Transport(_) | Self::Configuration(_) | Self::Io(_) => {
                ErrorCode::NotSupported
            }
        }
    }

    /// True for errors that end the connection they occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_) | Self::SessionClosed)
    }
}

/// Alias for Result with EtpError.
pub type EtpResult<T> = Result<T, EtpError>;
