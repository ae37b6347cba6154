//! Core types for the etpkit protocol engine.
//!
//! This crate defines the data shared by sessions, handlers and transports:
//! message headers and flags, the typed message records, protocol and error
//! code constants, the error type, and configuration. It contains no I/O.

pub mod config;
pub mod error;
pub mod header;
pub mod message;
pub mod protocol;

pub use error::{EtpError, EtpResult};
pub use header::{MessageFlags, MessageHeader, ResponseKind};
pub use protocol::{ErrorCode, Role};
