//! Session and server configuration.
//!
//! Both structs deserialize from TOML with every field optional; missing
//! fields take the values from `Default`.

use crate::protocol::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// Maximum size of a single reassembled message (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// How message headers and bodies are serialized on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Compact binary records in binary frames.
    #[default]
    Binary,
    /// JSON documents in text frames.
    Json,
}

impl Encoding {
    /// Value of the `etp-encoding` upgrade header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Json => "json",
        }
    }

    /// Parse an `etp-encoding` header value, ignoring case.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "binary" => Some(Self::Binary),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Options supplied when a session is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name this endpoint reports during session negotiation.
    pub application_name: String,
    /// Version this endpoint reports during session negotiation.
    pub application_version: String,
    /// Client or server.
    pub role: Role,
    /// Wire encoding used for outgoing messages.
    pub encoding: Encoding,
    /// Upgrade request headers (client) or received headers (server).
    pub headers: HashMap<String, String>,
    /// Largest reassembled message accepted from the peer.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_name: "etpkit".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            role: Role::Client,
            encoding: Encoding::Binary,
            headers: HashMap::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Configuration for a listening server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// Options applied to every accepted session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            session: SessionConfig {
                role: Role::Server,
                ..SessionConfig::default()
            },
        }
    }
}

impl ServerConfig {
    /// Parse a server configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(contents)?;
        config.session.role = Role::Server;
        Ok(config)
    }
}

/// Load a server configuration file, falling back to defaults when the file
/// is missing or malformed.
pub fn load_server_config(path: &Path) -> ServerConfig {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return ServerConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match ServerConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to parse config, using defaults");
                ServerConfig::default()
            }
        },
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to read config, using defaults");
            ServerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.encoding, Encoding::Binary);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_server_config_from_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            listen_addr = "0.0.0.0:9000"

            [session]
            application_name = "store-server"
            encoding = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.session.application_name, "store-server");
        assert_eq!(config.session.encoding, Encoding::Json);
        assert_eq!(config.session.role, Role::Server);
        assert_eq!(config.session.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_server_config(&dir.path().join("missing.toml"));
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_load_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "listen_addr = [not valid").unwrap();
        let config = load_server_config(&path);
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "listen_addr = \"127.0.0.1:7070\"\n").unwrap();
        let config = load_server_config(&path);
        assert_eq!(config.listen_addr.port(), 7070);
    }

    #[test]
    fn test_encoding_header_values() {
        assert_eq!(Encoding::from_header("JSON"), Some(Encoding::Json));
        assert_eq!(Encoding::from_header(" binary "), Some(Encoding::Binary));
        assert_eq!(Encoding::from_header("avro"), None);
        assert_eq!(Encoding::Json.as_str(), "json");
    }
}
