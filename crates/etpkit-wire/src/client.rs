//! WebSocket client connect.

use crate::framing::run_framing_loop;
use crate::handler::ProtocolHandler;
use crate::server::ENCODING_HEADER;
use crate::session::Session;
use crate::transport::websocket::{self, ETP_SUBPROTOCOL};
use crate::uri::to_websocket_uri;
use etpkit_types::config::SessionConfig;
use etpkit_types::{EtpError, EtpResult, Role};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::{debug, info};

/// Connect to a server and open a client-role session over the connection.
///
/// `url` may use `http`, `https`, `ws` or `wss`. Headers from
/// `config.headers` are added to the upgrade request, after the subprotocol
/// and encoding headers. Returns the open session and the handle of its
/// framing loop task, which finishes when the connection ends.
pub async fn connect(
    url: &str,
    config: SessionConfig,
    handlers: Vec<Arc<dyn ProtocolHandler>>,
) -> EtpResult<(Arc<Session>, JoinHandle<EtpResult<()>>)> {
    let uri = to_websocket_uri(url)?;
    let mut request = uri
        .as_str()
        .into_client_request()
        .map_err(|e| EtpError::InvalidArgument(format!("invalid endpoint {uri}: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(ETP_SUBPROTOCOL),
    );
    headers.insert(
        HeaderName::from_static(ENCODING_HEADER),
        HeaderValue::from_static(config.encoding.as_str()),
    );
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| EtpError::InvalidArgument(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EtpError::InvalidArgument(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }

    let (ws, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| EtpError::Transport(format!("connect to {uri}: {e}")))?;
    debug!(%uri, status = %response.status(), "WebSocket handshake complete");

    let mut config = config;
    config.role = Role::Client;
    let (sender, receiver) = websocket::split(ws);
    let session = Session::builder(config)
        .handlers(handlers)
        .build(Box::new(sender))?;
    session.open()?;
    info!(session_id = %session.id(), %uri, "Connected");

    let handle = tokio::spawn(run_framing_loop(Arc::clone(&session), receiver));
    Ok((session, handle))
}
