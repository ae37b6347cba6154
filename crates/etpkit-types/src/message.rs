//! Message body records.
//!
//! These are the typed payloads of the common message types (Acknowledge,
//! ProtocolException) and of the protocols shipped with the engine. Field
//! names serialize in camelCase for the JSON encoding; the binary encoding is
//! positional, so field order is part of the wire format.

use crate::protocol::{ErrorCode, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A loosely typed value used for capabilities and session attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Receipt of a previous message. Carries no fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acknowledge {}

/// Error report referring to a previous message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolException {
    pub error_code: i32,
    pub error_message: String,
}

impl ProtocolException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code.code(),
            error_message: message.into(),
        }
    }
}

/// Protocol version triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
    pub revision: i32,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            major: 1,
            minor: 2,
            revision: 0,
        }
    }
}

/// A protocol offered or requested during session negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedProtocol {
    pub protocol: i32,
    pub protocol_version: Version,
    pub role: Role,
    pub protocol_capabilities: HashMap<String, DataValue>,
}

/// Core: client asks the server to open a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSession {
    pub application_name: String,
    pub application_version: String,
    pub requested_protocols: Vec<SupportedProtocol>,
    pub supported_objects: Vec<String>,
}

/// Core: server accepts the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSession {
    pub application_name: String,
    pub application_version: String,
    pub session_id: String,
    pub supported_protocols: Vec<SupportedProtocol>,
    pub supported_objects: Vec<String>,
}

/// Core: either side ends the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseSession {
    pub reason: String,
}

/// DiscoveryQuery: search for resources below a URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResources {
    pub uri: String,
}

/// A resource returned by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub content_type: String,
    pub last_changed: i64,
    pub custom_data: HashMap<String, DataValue>,
}

/// DiscoveryQuery: one part of the answer to FindResources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResourcesResponse {
    pub resources: Vec<Resource>,
    pub server_sort_order: String,
}
