//! Request correlation for query-style protocols.
//!
//! A handler that needs request context when the response arrives records it
//! under the request's message id from the session's send hook, before the
//! frame is written. Responses look the context up by their correlation id.

use dashmap::DashMap;
use etpkit_types::{MessageHeader, ResponseKind};
use tracing::{debug, warn};

/// Concurrent map from outstanding request message id to request context.
///
/// Inserts happen on the sending side and lookups/removals on the receiving
/// side, possibly from different tasks at the same time.
#[derive(Debug)]
pub struct PendingRequests<C> {
    entries: DashMap<i64, C>,
}

impl<C: Clone> PendingRequests<C> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Record context for an outgoing request.
    ///
    /// A request id must never be reused while outstanding; if it is, the new
    /// context replaces the old one and the collision is logged.
    pub fn insert(&self, message_id: i64, context: C) {
        if self.entries.insert(message_id, context).is_some() {
            warn!(message_id, "Duplicate pending request id, replacing context");
        }
    }

    /// Find the context for a response and release it if the response ends
    /// the exchange.
    ///
    /// Continuation parts keep the entry. Final and no-data responses remove
    /// it. A response with neither flag is treated as a single final response
    /// and logged, since its position in the sequence cannot be known.
    pub fn resolve(&self, header: &MessageHeader) -> Option<C> {
        let id = header.correlation_id;
        let context = match header.response_kind() {
            ResponseKind::Continuation => self.entries.get(&id).map(|e| e.value().clone()),
            ResponseKind::Final => self.entries.remove(&id).map(|(_, c)| c),
            ResponseKind::Ambiguous => {
                warn!(
                    correlation_id = id,
                    flags = header.message_flags.bits(),
                    "Response carries neither final nor multi-part flag, treating as final"
                );
                self.entries.remove(&id).map(|(_, c)| c)
            }
        };
        if context.is_none() {
            debug!(correlation_id = id, "No pending request for response");
        }
        context
    }

    /// Context for `message_id`, leaving the entry in place.
    pub fn get(&self, message_id: i64) -> Option<C> {
        self.entries.get(&message_id).map(|e| e.value().clone())
    }

    /// Drop an entry, e.g. when a collaborator gives up waiting for it.
    pub fn remove(&self, message_id: i64) -> Option<C> {
        self.entries.remove(&message_id).map(|(_, c)| c)
    }

    /// Whether `message_id` is outstanding.
    pub fn contains(&self, message_id: i64) -> bool {
        self.entries.contains_key(&message_id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every outstanding request.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<C: Clone> Default for PendingRequests<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etpkit_types::MessageFlags;
    use std::sync::Arc;

    fn response(correlation_id: i64, flags: MessageFlags) -> MessageHeader {
        MessageHeader::new(13, 2, correlation_id, flags)
    }

    #[test]
    fn test_multi_part_keeps_entry_until_final() {
        let pending = PendingRequests::new();
        pending.insert(4, "eml:///wells".to_string());

        let first = pending.resolve(&response(4, MessageFlags::MULTI_PART));
        let second = pending.resolve(&response(4, MessageFlags::MULTI_PART));
        assert_eq!(first.as_deref(), Some("eml:///wells"));
        assert_eq!(second.as_deref(), Some("eml:///wells"));
        assert!(pending.contains(4));

        let last = pending.resolve(&response(4, MessageFlags::MULTI_PART_AND_FINAL_PART));
        assert_eq!(last.as_deref(), Some("eml:///wells"));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_no_data_releases_once() {
        let pending = PendingRequests::new();
        pending.insert(8, "eml:///empty".to_string());

        assert!(pending.resolve(&response(8, MessageFlags::NO_DATA)).is_some());
        assert!(pending.resolve(&response(8, MessageFlags::FINAL_PART)).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_ambiguous_response_is_final() {
        let pending = PendingRequests::new();
        pending.insert(2, 10u32);
        assert_eq!(pending.resolve(&response(2, MessageFlags::NONE)), Some(10));
        assert!(!pending.contains(2));
    }

    #[test]
    fn test_duplicate_insert_last_write_wins() {
        let pending = PendingRequests::new();
        pending.insert(1, "a");
        pending.insert(1, "b");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get(1), Some("b"));
        assert_eq!(pending.remove(1), Some("b"));
        assert_eq!(pending.remove(1), None);
    }

    #[test]
    fn test_concurrent_insert_and_resolve() {
        let pending = Arc::new(PendingRequests::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let pending = Arc::clone(&pending);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        pending.insert(t * 1000 + i, i);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(pending.len(), 1000);

        let readers: Vec<_> = (0..4)
            .map(|t| {
                let pending = Arc::clone(&pending);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let ctx = pending.resolve(&response(t * 1000 + i, MessageFlags::FINAL_PART));
                        assert_eq!(ctx, Some(i));
                    }
                })
            })
            .collect();
        for r in readers {
            r.join().unwrap();
        }
        assert!(pending.is_empty());
    }
}
