//! etpkit session engine — many protocols over one WebSocket connection.
//!
//! A single connection carries several logical protocols, each served by one
//! handler. The session assigns message ids, serializes every outgoing write
//! through one send gate, and routes inbound messages to the handler for the
//! protocol named in their header.
//!
//! ## Architecture
//!
//! - **Codec**: header + body framing in the binary or JSON encoding
//! - **Session**: message ids, send gate, dispatch, lifecycle
//! - **ProtocolHandler**: one role of one protocol, with observer lists
//! - **PendingRequests**: request context kept until the final response
//! - **Framing loop**: chunk reassembly and dispatch, one task per connection
//! - **EtpServer** / **connect**: WebSocket endpoints
//! - **SessionRegistry**: open sessions of a server

pub mod client;
pub mod codec;
pub mod correlation;
pub mod framing;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod uri;

pub use client::connect;
pub use codec::{Codec, Envelope, Frame, FrameKind, MessageBody};
pub use correlation::PendingRequests;
pub use framing::{run_framing_loop, FrameAccumulator};
pub use handler::{
    Dispatch, HandlerBase, HandlerRegistry, ObserverId, Observers, ProtocolEvent, ProtocolHandler,
};
pub use registry::SessionRegistry;
pub use server::{EtpServer, HandlerFactory};
pub use session::{Session, SessionBuilder, SessionState};
pub use transport::{Chunk, TransportReceiver, TransportSender};
pub use uri::to_websocket_uri;
