//! Core protocol (0): session negotiation and shutdown.
//!
//! The client announces the protocols it wants with `RequestSession`, naming
//! for each the role it expects the server to play. The server answers with
//! `OpenSession`, listing the subset of those protocols it actually serves in
//! the requested role. Either side ends the session with `CloseSession`.

use crate::codec::MessageBody;
use crate::handler::{Dispatch, HandlerBase, Observers, ProtocolEvent, ProtocolHandler};
use async_trait::async_trait;
use etpkit_types::message::{CloseSession, OpenSession, RequestSession, SupportedProtocol};
use etpkit_types::protocol::{core_protocol, protocols};
use etpkit_types::{ErrorCode, EtpError, EtpResult, MessageFlags, MessageHeader, Role};
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

/// Server side of the core protocol.
pub struct CoreServerHandler {
    base: HandlerBase,
    /// `RequestSession` received from the client.
    pub on_request_session: Observers<ProtocolEvent<RequestSession>>,
    /// `CloseSession` received from the client.
    pub on_close_session: Observers<ProtocolEvent<CloseSession>>,
}

impl CoreServerHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(protocols::CORE, Role::Server, Role::Client),
            on_request_session: Observers::new(),
            on_close_session: Observers::new(),
        }
    }

    /// Protocols served by this session that the client asked for, in the
    /// role it asked for.
    fn negotiate(&self, requested: &[SupportedProtocol]) -> EtpResult<Vec<SupportedProtocol>> {
        let session = self.base.session()?;
        Ok(session
            .handlers()
            .supported_protocols()
            .into_iter()
            .filter(|served| {
                requested
                    .iter()
                    .any(|r| r.protocol == served.protocol && r.role == served.role)
            })
            .collect())
    }

    async fn handle_request_session(
        &self,
        header: &MessageHeader,
        request: RequestSession,
    ) -> EtpResult<()> {
        let event = self
            .base
            .notify(&self.on_request_session, header, request, None);
        let request = event.message;

        let negotiated = self.negotiate(&request.requested_protocols)?;
        if negotiated.is_empty() {
            warn!(
                application = %request.application_name,
                requested = request.requested_protocols.len(),
                "No requested protocol is supported"
            );
            self.base
                .protocol_exception(
                    ErrorCode::NoSupportedProtocols,
                    "none of the requested protocols are supported",
                    header.message_id,
                )
                .await?;
            return Ok(());
        }

        let session = self.base.session()?;
        let config = session.config();
        let open = OpenSession {
            application_name: config.application_name.clone(),
            application_version: config.application_version.clone(),
            session_id: session.id().to_string(),
            supported_protocols: negotiated,
            supported_objects: request.supported_objects,
        };
        info!(
            session_id = %session.id(),
            application = %request.application_name,
            protocols = ?open.supported_protocols.iter().map(|p| p.protocol).collect::<Vec<_>>(),
            "Session negotiated"
        );

        let reply = self.base.create_header(
            core_protocol::OPEN_SESSION,
            header.message_id,
            MessageFlags::FINAL_PART,
        );
        self.base.send(reply, &open).await?;
        Ok(())
    }
}

impl Default for CoreServerHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for CoreServerHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    async fn handle_protocol_message(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> EtpResult<Dispatch> {
        match header.message_type {
            core_protocol::REQUEST_SESSION => {
                self.handle_request_session(header, body.decode()?).await?;
            }
            core_protocol::CLOSE_SESSION => {
                let close: CloseSession = body.decode()?;
                let event = self.base.notify(&self.on_close_session, header, close, None);
                self.base.session()?.close(&event.message.reason).await;
            }
            _ => return Ok(Dispatch::Unhandled),
        }
        Ok(Dispatch::Handled)
    }
}

/// Client side of the core protocol.
pub struct CoreClientHandler {
    base: HandlerBase,
    server_session_id: watch::Sender<Option<String>>,
    negotiated: RwLock<Vec<SupportedProtocol>>,
    /// `OpenSession` received from the server.
    pub on_open_session: Observers<ProtocolEvent<OpenSession>>,
    /// `CloseSession` received from the server.
    pub on_close_session: Observers<ProtocolEvent<CloseSession>>,
}

impl CoreClientHandler {
    pub fn new() -> Self {
        let (server_session_id, _) = watch::channel(None);
        Self {
            base: HandlerBase::new(protocols::CORE, Role::Client, Role::Server),
            server_session_id,
            negotiated: RwLock::new(Vec::new()),
            on_open_session: Observers::new(),
            on_close_session: Observers::new(),
        }
    }

    /// Ask the server to open the session with every protocol this session
    /// has a handler for.
    pub async fn request_session(&self) -> EtpResult<i64> {
        let session = self.base.session()?;
        let config = session.config();
        let request = RequestSession {
            application_name: config.application_name.clone(),
            application_version: config.application_version.clone(),
            requested_protocols: session.handlers().requested_protocols(),
            supported_objects: Vec::new(),
        };
        let header = self
            .base
            .create_header(core_protocol::REQUEST_SESSION, 0, MessageFlags::NONE);
        self.base.send(header, &request).await
    }

    /// Tell the server the session is ending, then close it locally.
    pub async fn close_session(&self, reason: &str) -> EtpResult<()> {
        let session = self.base.session()?;
        let header = self
            .base
            .create_header(core_protocol::CLOSE_SESSION, 0, MessageFlags::NONE);
        let close = CloseSession {
            reason: reason.to_string(),
        };
        match self.base.send(header, &close).await {
            Ok(_) | Err(EtpError::SessionClosed) => {}
            Err(e) => warn!(error = %e, "CloseSession not delivered"),
        }
        session.close(reason).await;
        Ok(())
    }

    /// Session id assigned by the server, once `OpenSession` has arrived.
    pub fn server_session_id(&self) -> Option<String> {
        self.server_session_id.borrow().clone()
    }

    /// Protocols the server agreed to serve.
    pub fn negotiated_protocols(&self) -> Vec<SupportedProtocol> {
        self.negotiated
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait for `OpenSession` and return the server session id.
    ///
    /// Fails with [`EtpError::SessionClosed`] if the session closes first.
    pub async fn wait_for_open(&self) -> EtpResult<String> {
        let session = self.base.session()?;
        let mut rx = self.server_session_id.subscribe();
        tokio::select! {
            _ = session.closed() => Err(EtpError::SessionClosed),
            opened = rx.wait_for(Option::is_some) => opened
                .map_err(|_| EtpError::SessionClosed)?
                .clone()
                .ok_or(EtpError::SessionClosed),
        }
    }
}

impl Default for CoreClientHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for CoreClientHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    async fn handle_protocol_message(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> EtpResult<Dispatch> {
        match header.message_type {
            core_protocol::OPEN_SESSION => {
                let open: OpenSession = body.decode()?;
                *self.negotiated.write().unwrap_or_else(|e| e.into_inner()) =
                    open.supported_protocols.clone();
                info!(
                    server_session_id = %open.session_id,
                    server = %open.application_name,
                    "Session opened by server"
                );
                let session_id = open.session_id.clone();
                self.base.notify(&self.on_open_session, header, open, None);
                self.server_session_id.send_replace(Some(session_id));
            }
            core_protocol::CLOSE_SESSION => {
                let close: CloseSession = body.decode()?;
                let event = self.base.notify(&self.on_close_session, header, close, None);
                self.base.session()?.close(&event.message.reason).await;
            }
            _ => return Ok(Dispatch::Unhandled),
        }
        Ok(Dispatch::Handled)
    }
}
