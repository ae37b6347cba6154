//! WebSocket server — accepts connections and runs one session per socket.
//!
//! [`EtpServer::start`] binds a TCP listener and spawns the accept loop.
//! Each accepted connection is upgraded to WebSocket, wrapped in a
//! server-role [`Session`] whose handlers come from the [`HandlerFactory`],
//! recorded in the shared [`SessionRegistry`], and driven by its own framing
//! loop task until the connection ends.

use crate::framing::run_framing_loop;
use crate::handler::ProtocolHandler;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::transport::websocket::{self, ETP_SUBPROTOCOL};
use etpkit_types::config::{Encoding, ServerConfig};
use etpkit_types::{EtpError, EtpResult, MessageHeader, Role};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info};

/// Upgrade header naming the wire encoding the client will use.
pub const ENCODING_HEADER: &str = "etp-encoding";

/// Builds a fresh set of handlers for every accepted session.
pub type HandlerFactory = Arc<dyn Fn() -> Vec<Arc<dyn ProtocolHandler>> + Send + Sync>;

/// A listening server.
pub struct EtpServer {
    config: ServerConfig,
    registry: SessionRegistry,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl EtpServer {
    /// Bind the configured address and start accepting connections.
    ///
    /// Returns the server and the handle of the accept loop task.
    pub async fn start(
        config: ServerConfig,
        registry: SessionRegistry,
        factory: HandlerFactory,
    ) -> EtpResult<(Arc<Self>, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            %local_addr,
            application = %config.session.application_name,
            "ETP server listening"
        );

        let server = Arc::new(Self {
            config,
            registry,
            local_addr,
        });

        let server_clone = Arc::clone(&server);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, server_clone, factory).await;
        });

        Ok((server, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Configuration the server was started with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sessions currently open on this server.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Send a message to every open session.
    pub async fn broadcast<T>(&self, header: &MessageHeader, body: &T) -> Vec<(String, EtpError)>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.registry.broadcast(header, body).await
    }

    /// Close every open session.
    pub async fn close_all(&self, reason: &str) {
        for session in self.registry.sessions() {
            session.close(reason).await;
        }
    }

    /// Internal accept loop — runs in a spawned task.
    async fn accept_loop(listener: TcpListener, server: Arc<EtpServer>, factory: HandlerFactory) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "Accepted connection");
                    let server = Arc::clone(&server);
                    let factory = Arc::clone(&factory);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_inbound(stream, addr, &server, &factory).await
                        {
                            debug!(%addr, error = %e, "Inbound connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Upgrade one connection and run its session until it ends.
    async fn handle_inbound(
        stream: TcpStream,
        addr: SocketAddr,
        server: &EtpServer,
        factory: &HandlerFactory,
    ) -> EtpResult<()> {
        let mut received_headers = HashMap::new();
        let callback = |request: &Request, mut response: Response| {
            received_headers = collect_headers(request);
            let offers_etp = request
                .headers()
                .get_all(SEC_WEBSOCKET_PROTOCOL)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|p| p.trim().eq_ignore_ascii_case(ETP_SUBPROTOCOL));
            if offers_etp {
                response.headers_mut().insert(
                    SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static(ETP_SUBPROTOCOL),
                );
            }
            Ok::<Response, ErrorResponse>(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| EtpError::Transport(format!("WebSocket handshake with {addr}: {e}")))?;

        let mut config = server.config.session.clone();
        config.role = Role::Server;
        if let Some(encoding) = received_headers
            .get(ENCODING_HEADER)
            .and_then(|v| Encoding::from_header(v))
        {
            config.encoding = encoding;
        }
        config.headers = received_headers;

        let (sender, receiver) = websocket::split(ws);
        let session = Session::builder(config)
            .handlers(factory())
            .registry(server.registry.clone())
            .build(Box::new(sender))?;
        session.open()?;
        info!(
            session_id = %session.id(),
            %addr,
            encoding = session.encoding().as_str(),
            "Session accepted"
        );

        run_framing_loop(session, receiver).await
    }
}

/// Request headers as lowercase name to value, skipping non-UTF-8 values.
fn collect_headers(request: &Request) -> HashMap<String, String> {
    request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

impl std::fmt::Debug for EtpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtpServer")
            .field("local_addr", &self.local_addr)
            .field("sessions", &self.registry.len())
            .finish()
    }
}
