//! Handler registry: protocol number to handler.
//!
//! Built once while a session is constructed and read-only afterwards, so it
//! needs no interior locking.

use super::ProtocolHandler;
use etpkit_types::message::{SupportedProtocol, Version};
use etpkit_types::protocol::protocols;
use etpkit_types::{EtpError, EtpResult, Role};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps each protocol number to the single handler serving it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<i32, Arc<dyn ProtocolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. Fails if its protocol already has one.
    pub fn register(&mut self, handler: Arc<dyn ProtocolHandler>) -> EtpResult<()> {
        let protocol = handler.protocol();
        if self.handlers.contains_key(&protocol) {
            return Err(EtpError::Configuration(format!(
                "a handler for protocol {protocol} is already registered"
            )));
        }
        self.handlers.insert(protocol, handler);
        Ok(())
    }

    /// Find the handler for a protocol number.
    pub fn resolve(&self, protocol: i32) -> EtpResult<Arc<dyn ProtocolHandler>> {
        self.handlers
            .get(&protocol)
            .cloned()
            .ok_or(EtpError::UnsupportedProtocol(protocol))
    }

    /// Find the handler for a protocol only if it plays `role`.
    pub fn resolve_role(&self, protocol: i32, role: &Role) -> EtpResult<Arc<dyn ProtocolHandler>> {
        let handler = self.resolve(protocol)?;
        if handler.role() == role {
            Ok(handler)
        } else {
            Err(EtpError::UnsupportedProtocol(protocol))
        }
    }

    /// Whether a handler serves `protocol`.
    pub fn contains(&self, protocol: i32) -> bool {
        self.handlers.contains_key(&protocol)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers in ascending protocol order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProtocolHandler>> {
        self.handlers.values()
    }

    /// Protocols this endpoint serves, with the role it plays in each.
    /// Core is implicit in every session and is not listed.
    pub fn supported_protocols(&self) -> Vec<SupportedProtocol> {
        self.iter()
            .filter(|h| h.protocol() != protocols::CORE)
            .map(|h| SupportedProtocol {
                protocol: h.protocol(),
                protocol_version: Version::default(),
                role: h.role().clone(),
                protocol_capabilities: h.capabilities(),
            })
            .collect()
    }

    /// Protocols this endpoint asks the peer for, with the role the peer
    /// should play in each.
    pub fn requested_protocols(&self) -> Vec<SupportedProtocol> {
        self.iter()
            .filter(|h| h.protocol() != protocols::CORE)
            .map(|h| SupportedProtocol {
                protocol: h.protocol(),
                protocol_version: Version::default(),
                role: h.requested_role().clone(),
                protocol_capabilities: h.capabilities(),
            })
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("protocols", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
