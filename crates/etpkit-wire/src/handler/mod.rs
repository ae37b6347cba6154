//! Protocol handler contract.
//!
//! A [`ProtocolHandler`] implements one role of one protocol. The session
//! resolves every inbound header to its handler and calls
//! [`ProtocolHandler::handle_message`], which handles the message types
//! common to all protocols (Acknowledge, ProtocolException) and passes
//! everything else to [`ProtocolHandler::handle_protocol_message`].
//!
//! Handlers share their plumbing through [`HandlerBase`]: identity, the weak
//! back reference to the owning session, header construction, sending, and
//! event notification.

pub mod observer;
pub mod registry;

use crate::codec::MessageBody;
use crate::session::Session;
use async_trait::async_trait;
use etpkit_types::message::{Acknowledge, DataValue, ProtocolException};
use etpkit_types::protocol::common;
use etpkit_types::{ErrorCode, EtpError, EtpResult, MessageFlags, MessageHeader, Role};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, warn};

pub use observer::{ObserverId, ObserverResult, Observers};
pub use registry::HandlerRegistry;

/// Outcome of protocol-specific dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The message type was recognized and handled.
    Handled,
    /// The protocol has no case for this message type.
    Unhandled,
}

/// A decoded message delivered to observers.
#[derive(Debug, Clone)]
pub struct ProtocolEvent<T, C = ()> {
    pub header: MessageHeader,
    pub message: T,
    /// Request context recovered from the correlation table, if any.
    pub context: Option<C>,
}

/// State shared by every handler implementation.
pub struct HandlerBase {
    protocol: i32,
    role: Role,
    requested_role: Role,
    session: OnceLock<Weak<Session>>,
    /// Acknowledge messages received on this protocol.
    pub on_acknowledge: Observers<ProtocolEvent<Acknowledge>>,
    /// ProtocolException messages received on this protocol.
    pub on_protocol_exception: Observers<ProtocolEvent<ProtocolException>>,
}

impl HandlerBase {
    /// Base for a handler playing `role` on `protocol`.
    pub fn new(protocol: i32, role: Role, requested_role: Role) -> Self {
        Self {
            protocol,
            role,
            requested_role,
            session: OnceLock::new(),
            on_acknowledge: Observers::new(),
            on_protocol_exception: Observers::new(),
        }
    }

    /// Protocol number served.
    pub fn protocol(&self) -> i32 {
        self.protocol
    }

    /// Role this handler plays.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Role this handler expects the peer to play.
    pub fn requested_role(&self) -> &Role {
        &self.requested_role
    }

    /// Bind this handler to its session. A handler belongs to one session.
    pub(crate) fn attach(&self, session: Weak<Session>) -> EtpResult<()> {
        self.session.set(session).map_err(|_| {
            EtpError::Configuration(format!(
                "handler for protocol {} is already attached to a session",
                self.protocol
            ))
        })
    }

    /// Whether the handler has been bound to a session.
    pub fn is_attached(&self) -> bool {
        self.session.get().is_some()
    }

    /// The owning session, if it is still alive.
    pub fn session(&self) -> EtpResult<Arc<Session>> {
        self.session
            .get()
            .and_then(Weak::upgrade)
            .ok_or(EtpError::SessionClosed)
    }

    fn session_id(&self) -> String {
        self.session()
            .map(|s| s.id().to_string())
            .unwrap_or_default()
    }

    /// Build an outgoing header on this handler's protocol.
    pub fn create_header(
        &self,
        message_type: i32,
        correlation_id: i64,
        flags: MessageFlags,
    ) -> MessageHeader {
        MessageHeader::new(self.protocol, message_type, correlation_id, flags)
    }

    /// Send a message through the owning session.
    pub async fn send<T>(&self, header: MessageHeader, body: &T) -> EtpResult<i64>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.session()?.send_message(header, body).await
    }

    /// Send a message and run `on_assigned` with the final header before the
    /// frame leaves the process.
    pub async fn send_with<T, F>(
        &self,
        header: MessageHeader,
        body: &T,
        on_assigned: F,
    ) -> EtpResult<i64>
    where
        T: Serialize + Sync + ?Sized,
        F: FnOnce(&MessageHeader) + Send,
    {
        self.session()?
            .send_message_with(header, body, on_assigned)
            .await
    }

    /// Send an Acknowledge correlated to `correlation_id`.
    pub async fn acknowledge(&self, correlation_id: i64, flags: MessageFlags) -> EtpResult<i64> {
        let header = self.create_header(common::ACKNOWLEDGE, correlation_id, flags);
        self.send(header, &Acknowledge {}).await
    }

    /// Send a ProtocolException correlated to `correlation_id`.
    pub async fn protocol_exception(
        &self,
        code: ErrorCode,
        message: &str,
        correlation_id: i64,
    ) -> EtpResult<i64> {
        let header = self.create_header(common::PROTOCOL_EXCEPTION, correlation_id, MessageFlags::NONE);
        self.send(header, &ProtocolException::new(code, message))
            .await
    }

    /// Record a received message in the log.
    pub fn received<T: Serialize>(&self, header: &MessageHeader, message: &T) {
        let header_json = serde_json::to_string(header).unwrap_or_default();
        let body_json = serde_json::to_string(message).unwrap_or_default();
        debug!(
            session_id = %self.session_id(),
            received_at = %chrono::Utc::now().to_rfc3339(),
            header = %header_json,
            body = %body_json,
            "Message received"
        );
    }

    /// Log a received message and deliver it to `observers`.
    pub fn notify<T, C>(
        &self,
        observers: &Observers<ProtocolEvent<T, C>>,
        header: &MessageHeader,
        message: T,
        context: Option<C>,
    ) -> ProtocolEvent<T, C>
    where
        T: Serialize,
    {
        self.received(header, &message);
        let event = ProtocolEvent {
            header: header.clone(),
            message,
            context,
        };
        observers.notify(&event);
        event
    }
}

impl std::fmt::Debug for HandlerBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBase")
            .field("protocol", &self.protocol)
            .field("role", &self.role)
            .field("requested_role", &self.requested_role)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// One role of one protocol.
///
/// Implementors provide [`base`](Self::base) and usually override
/// [`handle_protocol_message`](Self::handle_protocol_message). The remaining
/// methods have working defaults.
#[async_trait]
pub trait ProtocolHandler: Send + Sync + 'static {
    fn base(&self) -> &HandlerBase;

    fn protocol(&self) -> i32 {
        self.base().protocol()
    }

    fn role(&self) -> &Role {
        self.base().role()
    }

    fn requested_role(&self) -> &Role {
        self.base().requested_role()
    }

    /// Protocol capabilities advertised during session negotiation.
    fn capabilities(&self) -> HashMap<String, DataValue> {
        HashMap::new()
    }

    /// Handle a message type specific to this protocol.
    async fn handle_protocol_message(
        &self,
        _header: &MessageHeader,
        _body: &MessageBody,
    ) -> EtpResult<Dispatch> {
        Ok(Dispatch::Unhandled)
    }

    async fn handle_acknowledge(
        &self,
        header: &MessageHeader,
        acknowledge: Acknowledge,
    ) -> EtpResult<()> {
        let base = self.base();
        base.notify(&base.on_acknowledge, header, acknowledge, None);
        Ok(())
    }

    async fn handle_protocol_exception(
        &self,
        header: &MessageHeader,
        exception: ProtocolException,
    ) -> EtpResult<()> {
        let base = self.base();
        let event = base.notify(&base.on_protocol_exception, header, exception, None);
        debug!(
            protocol = header.protocol,
            code = event.message.error_code,
            "Protocol exception: {}",
            event.message.error_message
        );
        Ok(())
    }

    /// Release per-request state once the final response has been handled.
    fn handle_final_response(&self, _correlation_id: i64) {}

    /// Entry point used by the session for every message on this protocol.
    async fn handle_message(&self, header: &MessageHeader, body: &MessageBody) -> EtpResult<()> {
        match header.message_type {
            common::PROTOCOL_EXCEPTION => {
                self.handle_protocol_exception(header, body.decode()?)
                    .await?;
            }
            common::ACKNOWLEDGE => {
                self.handle_acknowledge(header, body.decode()?).await?;
            }
            _ => {
                if self.handle_protocol_message(header, body).await? == Dispatch::Unhandled {
                    self.invalid_message(header).await?;
                }
            }
        }

        if header.is_final_response() {
            self.handle_final_response(header.correlation_id);
        }
        Ok(())
    }

    /// Tell the peer this protocol has no such message type.
    async fn invalid_message(&self, header: &MessageHeader) -> EtpResult<i64> {
        warn!(
            protocol = header.protocol,
            message_type = header.message_type,
            "Invalid message type"
        );
        let err = EtpError::InvalidMessageType {
            protocol: header.protocol,
            message_type: header.message_type,
        };
        self.protocol_exception(err.error_code(), &err.to_string(), header.message_id)
            .await
    }

    async fn acknowledge(&self, correlation_id: i64, flags: MessageFlags) -> EtpResult<i64> {
        self.base().acknowledge(correlation_id, flags).await
    }

    async fn protocol_exception(
        &self,
        code: ErrorCode,
        message: &str,
        correlation_id: i64,
    ) -> EtpResult<i64> {
        self.base()
            .protocol_exception(code, message, correlation_id)
            .await
    }
}
