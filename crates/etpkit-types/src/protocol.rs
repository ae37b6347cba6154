//! Protocol numbers, message type numbers and error codes.

use serde::{Deserialize, Serialize};

/// Well-known protocol numbers.
pub mod protocols {
    /// Session management and the common message types.
    pub const CORE: i32 = 0;
    /// Channel streaming.
    pub const CHANNEL_STREAMING: i32 = 1;
    /// Hierarchical resource discovery.
    pub const DISCOVERY: i32 = 3;
    /// Object store.
    pub const STORE: i32 = 4;
    /// Store change notifications.
    pub const STORE_NOTIFICATION: i32 = 5;
    /// Query-style resource discovery.
    pub const DISCOVERY_QUERY: i32 = 13;
    /// Query-style object store access.
    pub const STORE_QUERY: i32 = 14;
}

/// Message type numbers shared by every protocol.
pub mod common {
    /// Error report for a previous message.
    pub const PROTOCOL_EXCEPTION: i32 = 1000;
    /// Receipt of a previous message.
    pub const ACKNOWLEDGE: i32 = 1001;
}

/// Core protocol message types.
pub mod core_protocol {
    pub const REQUEST_SESSION: i32 = 1;
    pub const OPEN_SESSION: i32 = 2;
    pub const CLOSE_SESSION: i32 = 5;
}

/// DiscoveryQuery protocol message types.
pub mod discovery_query {
    pub const FIND_RESOURCES: i32 = 1;
    pub const FIND_RESOURCES_RESPONSE: i32 = 2;
}

/// Error codes carried by ProtocolException messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    NoRole = 1,
    NoSupportedProtocols = 2,
    InvalidMessageType = 3,
    UnsupportedProtocol = 4,
    InvalidArgument = 5,
    PermissionDenied = 6,
    NotSupported = 7,
    InvalidState = 8,
    InvalidUri = 9,
    AuthorizationExpired = 10,
    NotFound = 11,
}

impl ErrorCode {
    /// Numeric value sent on the wire.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Which side of a protocol a handler plays.
///
/// Roles are exchanged during session negotiation; a client requesting the
/// `customer` role of a protocol expects the server to play `store`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
    Customer,
    Store,
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Customer => "customer",
            Self::Store => "store",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::InvalidMessageType.code(), 3);
        assert_eq!(ErrorCode::UnsupportedProtocol.code(), 4);
        assert_eq!(ErrorCode::NotFound.code(), 11);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::Customer).unwrap();
        assert_eq!(json, "\"customer\"");
        let role: Role = serde_json::from_str("\"store\"").unwrap();
        assert_eq!(role, Role::Store);
        assert_eq!(Role::Server.to_string(), "server");
    }
}
