//! Session — one connection, many protocol handlers.
//!
//! A [`Session`] owns the sending half of a transport, the handler registry,
//! and the message-id counter. Every outgoing message passes through a single
//! send gate (an async mutex around the transport sender), which serializes
//! writes and makes the order of message ids on the wire match the order in
//! which they were assigned. Closing the session wakes every task waiting at
//! the gate with [`EtpError::SessionClosed`].
//!
//! Inbound frames arrive through [`Session::dispatch`], normally called by
//! the framing loop. Errors caused by the peer (undecodable frames, unknown
//! protocols, unknown message types) are answered with a ProtocolException
//! and never close the session.

use crate::codec::{Codec, Frame};
use crate::handler::{HandlerRegistry, ProtocolHandler};
use crate::registry::SessionRegistry;
use crate::transport::TransportSender;
use etpkit_types::config::{Encoding, SessionConfig};
use etpkit_types::message::ProtocolException;
use etpkit_types::protocol::{common, protocols};
use etpkit_types::{ErrorCode, EtpError, EtpResult, MessageFlags, MessageHeader};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet accepting traffic.
    Created,
    /// Sending and dispatching.
    Open,
    /// Close in progress; no new work is accepted.
    Closing,
    /// Transport closed and session deregistered.
    Closed,
}

/// A protocol session over one connection.
pub struct Session {
    id: String,
    config: SessionConfig,
    codec: Codec,
    handlers: HandlerRegistry,
    last_message_id: AtomicI64,
    sender: tokio::sync::Mutex<Box<dyn TransportSender>>,
    state: Mutex<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    registry: Option<SessionRegistry>,
}

/// Collects the handlers and options for a new [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    handlers: Vec<Arc<dyn ProtocolHandler>>,
    registry: Option<SessionRegistry>,
}

impl SessionBuilder {
    /// Add a protocol handler.
    pub fn handler(mut self, handler: Arc<dyn ProtocolHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Add several protocol handlers.
    pub fn handlers<I>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ProtocolHandler>>,
    {
        self.handlers.extend(handlers);
        self
    }

    /// Record the session in `registry` while it is open.
    pub fn registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the session around the sending half of a transport.
    ///
    /// Fails if two handlers share a protocol or a handler already belongs to
    /// another session.
    pub fn build(self, sender: Box<dyn TransportSender>) -> EtpResult<Arc<Session>> {
        let mut handlers = HandlerRegistry::new();
        for handler in self.handlers {
            if handler.base().is_attached() {
                return Err(EtpError::Configuration(format!(
                    "handler for protocol {} is already attached to a session",
                    handler.protocol()
                )));
            }
            handlers.register(handler)?;
        }

        let (shutdown_tx, _) = watch::channel(false);
        let session = Arc::new(Session {
            id: uuid::Uuid::new_v4().to_string(),
            codec: Codec::new(self.config.encoding),
            config: self.config,
            handlers,
            last_message_id: AtomicI64::new(0),
            sender: tokio::sync::Mutex::new(sender),
            state: Mutex::new(SessionState::Created),
            shutdown_tx,
            registry: self.registry,
        });

        for handler in session.handlers.iter() {
            handler.base().attach(Arc::downgrade(&session))?;
        }

        debug!(
            session_id = %session.id,
            role = %session.config.role,
            protocols = ?session.handlers,
            "Session created"
        );
        Ok(session)
    }
}

impl Session {
    /// Start building a session with `config`.
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            handlers: Vec::new(),
            registry: None,
        }
    }

    /// Identifier assigned at construction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configuration the session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Encoding used for outgoing messages.
    pub fn encoding(&self) -> Encoding {
        self.codec.encoding()
    }

    /// Handlers registered on this session.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Handler serving `protocol`.
    pub fn handler(&self, protocol: i32) -> EtpResult<Arc<dyn ProtocolHandler>> {
        self.handlers.resolve(protocol)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the session accepts traffic.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn ensure_open(&self) -> EtpResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EtpError::SessionClosed)
        }
    }

    /// Start accepting traffic and join the shared registry, if any.
    ///
    /// Opening an open session does nothing. A closed session cannot be
    /// reopened.
    pub fn open(self: &Arc<Self>) -> EtpResult<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                SessionState::Open => return Ok(()),
                SessionState::Created => *state = SessionState::Open,
                SessionState::Closing | SessionState::Closed => {
                    return Err(EtpError::InvalidState(format!(
                        "session {} is closed and cannot be reopened",
                        self.id
                    )))
                }
            }
        }

        if let Some(registry) = &self.registry {
            registry.add(Arc::clone(self));
        }
        info!(session_id = %self.id, role = %self.config.role, "Session opened");
        Ok(())
    }

    /// Send a message and return its assigned message id.
    pub async fn send_message<T>(&self, header: MessageHeader, body: &T) -> EtpResult<i64>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.send_message_with(header, body, |_| {}).await
    }

    /// Send a message, calling `on_assigned` with the final header after the
    /// message id is assigned and before the frame is written.
    ///
    /// `on_assigned` runs while the send gate is held, so a response to this
    /// message cannot be dispatched before it returns.
    pub async fn send_message_with<T, F>(
        &self,
        mut header: MessageHeader,
        body: &T,
        on_assigned: F,
    ) -> EtpResult<i64>
    where
        T: Serialize + Sync + ?Sized,
        F: FnOnce(&MessageHeader) + Send,
    {
        self.ensure_open()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let mut sender = tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|closed| *closed) => return Err(EtpError::SessionClosed),
            guard = self.sender.lock() => guard,
        };
        self.ensure_open()?;

        header.message_id = self.last_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        on_assigned(&header);
        let frame = self.codec.encode(&header, body)?;

        debug!(
            session_id = %self.id,
            protocol = header.protocol,
            message_type = header.message_type,
            message_id = header.message_id,
            correlation_id = header.correlation_id,
            len = frame.len(),
            "Sending message"
        );

        tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|closed| *closed) => Err(EtpError::SessionClosed),
            sent = sender.send(frame) => sent.map(|()| header.message_id),
        }
    }

    /// Send a ProtocolException that is not owned by any handler, e.g. for a
    /// frame whose header could not be decoded.
    pub async fn send_protocol_exception(
        &self,
        protocol: i32,
        code: ErrorCode,
        message: &str,
        correlation_id: i64,
    ) -> EtpResult<i64> {
        let header = MessageHeader::new(
            protocol,
            common::PROTOCOL_EXCEPTION,
            correlation_id,
            MessageFlags::NONE,
        );
        self.send_message(header, &ProtocolException::new(code, message))
            .await
    }

    /// Route one complete inbound frame to its handler.
    ///
    /// Returns an error only when the session can no longer send.
    pub async fn dispatch(&self, frame: &Frame) -> EtpResult<()> {
        self.ensure_open()?;

        let (header, body) = match Codec::decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Undecodable message");
                self.send_protocol_exception(protocols::CORE, e.error_code(), &e.to_string(), 0)
                    .await?;
                return Ok(());
            }
        };

        debug!(
            session_id = %self.id,
            protocol = header.protocol,
            message_type = header.message_type,
            message_id = header.message_id,
            correlation_id = header.correlation_id,
            flags = header.message_flags.bits(),
            "Dispatching message"
        );

        let handler = match self.handlers.resolve(header.protocol) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(session_id = %self.id, protocol = header.protocol, "No handler for protocol");
                self.send_protocol_exception(
                    header.protocol,
                    e.error_code(),
                    &e.to_string(),
                    header.message_id,
                )
                .await?;
                return Ok(());
            }
        };

        match handler.handle_message(&header, &body).await {
            Ok(()) => {
                let is_common = matches!(
                    header.message_type,
                    common::ACKNOWLEDGE | common::PROTOCOL_EXCEPTION
                );
                if header.acknowledge_requested() && !is_common {
                    handler
                        .acknowledge(header.message_id, MessageFlags::NONE)
                        .await?;
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    protocol = header.protocol,
                    message_type = header.message_type,
                    error = %e,
                    "Handler rejected message"
                );
                handler
                    .protocol_exception(e.error_code(), &e.to_string(), header.message_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Close the session. Idempotent.
    ///
    /// Pending and in-flight sends fail with [`EtpError::SessionClosed`], the
    /// framing loop stops, the transport is closed and the session leaves its
    /// shared registry. A transport that fails to close cleanly is only
    /// logged; the session ends up closed either way.
    pub async fn close(&self, reason: &str) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                SessionState::Closing | SessionState::Closed => return,
                SessionState::Created | SessionState::Open => *state = SessionState::Closing,
            }
        }
        info!(session_id = %self.id, reason, "Closing session");
        self.shutdown_tx.send_replace(true);

        let result = self.sender.lock().await.close(reason).await;
        if let Err(e) = result {
            debug!(session_id = %self.id, error = %e, "Transport close failed");
        }

        if let Some(registry) = &self.registry {
            registry.remove_session(self);
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SessionState::Closed;
        info!(session_id = %self.id, "Session closed");
    }

    /// Resolves once the session starts closing.
    pub async fn closed(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.config.role)
            .field("state", &self.state())
            .field("handlers", &self.handlers)
            .finish()
    }
}
