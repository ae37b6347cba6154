//! DiscoveryQuery protocol (13): find resources below a URI.
//!
//! The customer sends `FindResources` and the store answers with one or more
//! `FindResourcesResponse` parts, or with a no-data `Acknowledge` when nothing
//! matches. The customer keeps the queried URI for each outstanding request
//! so it can be handed back with every response part.

use crate::codec::MessageBody;
use crate::correlation::PendingRequests;
use crate::handler::{Dispatch, HandlerBase, Observers, ProtocolEvent, ProtocolHandler};
use async_trait::async_trait;
use etpkit_types::message::{
    Acknowledge, DataValue, FindResources, FindResourcesResponse, ProtocolException, Resource,
};
use etpkit_types::protocol::{discovery_query, protocols};
use etpkit_types::{EtpResult, MessageFlags, MessageHeader, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Largest number of resources a store puts in one response part.
pub const DEFAULT_MAX_RESPONSE_COUNT: usize = 100;

/// Customer side: issues queries and receives results.
pub struct DiscoveryQueryCustomerHandler {
    base: HandlerBase,
    requests: PendingRequests<String>,
    /// Each `FindResourcesResponse` part, with the URI that was queried.
    pub on_find_resources_response: Observers<ProtocolEvent<FindResourcesResponse, String>>,
}

impl DiscoveryQueryCustomerHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(protocols::DISCOVERY_QUERY, Role::Customer, Role::Store),
            requests: PendingRequests::new(),
            on_find_resources_response: Observers::new(),
        }
    }

    /// Ask the store for the resources under `uri`. Returns the request's
    /// message id.
    pub async fn find_resources(&self, uri: &str) -> EtpResult<i64> {
        let header = self
            .base
            .create_header(discovery_query::FIND_RESOURCES, 0, MessageFlags::NONE);
        let body = FindResources {
            uri: uri.to_string(),
        };

        let mut assigned = None;
        let result = self
            .base
            .send_with(header, &body, |h| {
                self.requests.insert(h.message_id, uri.to_string());
                assigned = Some(h.message_id);
            })
            .await;
        if let (Err(_), Some(id)) = (&result, assigned) {
            self.requests.remove(id);
        }
        result
    }

    /// Outstanding requests and their URIs.
    pub fn pending(&self) -> &PendingRequests<String> {
        &self.requests
    }
}

impl Default for DiscoveryQueryCustomerHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for DiscoveryQueryCustomerHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    async fn handle_protocol_message(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> EtpResult<Dispatch> {
        match header.message_type {
            discovery_query::FIND_RESOURCES_RESPONSE => {
                let response: FindResourcesResponse = body.decode()?;
                let uri = self.requests.resolve(header);
                self.base
                    .notify(&self.on_find_resources_response, header, response, uri);
                Ok(Dispatch::Handled)
            }
            _ => Ok(Dispatch::Unhandled),
        }
    }

    async fn handle_acknowledge(
        &self,
        header: &MessageHeader,
        acknowledge: Acknowledge,
    ) -> EtpResult<()> {
        // An empty result ends the exchange.
        if header.is_no_data() {
            let uri = self.requests.resolve(header);
            debug!(correlation_id = header.correlation_id, ?uri, "No resources found");
        }
        let base = self.base();
        base.notify(&base.on_acknowledge, header, acknowledge, None);
        Ok(())
    }

    async fn handle_protocol_exception(
        &self,
        header: &MessageHeader,
        exception: ProtocolException,
    ) -> EtpResult<()> {
        // A failed query gets no further parts.
        if header.correlation_id != 0 {
            if let Some(uri) = self.requests.resolve(header) {
                debug!(
                    correlation_id = header.correlation_id,
                    %uri,
                    code = exception.error_code,
                    "Query rejected by store"
                );
            }
        }
        let base = self.base();
        base.notify(&base.on_protocol_exception, header, exception, None);
        Ok(())
    }

    fn handle_final_response(&self, correlation_id: i64) {
        self.requests.remove(correlation_id);
    }
}

/// Source of resources for a store.
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    /// Resources under `uri`. An unknown URI may be reported as an error,
    /// which is returned to the customer as a ProtocolException.
    async fn find_resources(&self, uri: &str) -> EtpResult<Vec<Resource>>;
}

/// Store side: answers queries from a [`ResourceProvider`].
pub struct DiscoveryQueryStoreHandler {
    base: HandlerBase,
    provider: Arc<dyn ResourceProvider>,
    max_response_count: usize,
    /// Each `FindResources` request received.
    pub on_find_resources: Observers<ProtocolEvent<FindResources>>,
}

impl DiscoveryQueryStoreHandler {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            base: HandlerBase::new(protocols::DISCOVERY_QUERY, Role::Store, Role::Customer),
            provider,
            max_response_count: DEFAULT_MAX_RESPONSE_COUNT,
            on_find_resources: Observers::new(),
        }
    }

    /// Limit the number of resources per response part.
    pub fn with_max_response_count(mut self, count: usize) -> Self {
        self.max_response_count = count.max(1);
        self
    }

    async fn handle_find_resources(
        &self,
        header: &MessageHeader,
        request: FindResources,
    ) -> EtpResult<()> {
        let event = self.base.notify(&self.on_find_resources, header, request, None);
        let resources = self.provider.find_resources(&event.message.uri).await?;

        if resources.is_empty() {
            self.base
                .acknowledge(header.message_id, MessageFlags::NO_DATA)
                .await?;
            return Ok(());
        }

        let parts: Vec<&[Resource]> = resources.chunks(self.max_response_count).collect();
        let count = parts.len();
        debug!(
            uri = %event.message.uri,
            resources = resources.len(),
            parts = count,
            "Answering FindResources"
        );
        for (i, part) in parts.into_iter().enumerate() {
            let flags = match (count, i + 1 == count) {
                (1, _) => MessageFlags::FINAL_PART,
                (_, true) => MessageFlags::MULTI_PART_AND_FINAL_PART,
                (_, false) => MessageFlags::MULTI_PART,
            };
            let reply = self.base.create_header(
                discovery_query::FIND_RESOURCES_RESPONSE,
                header.message_id,
                flags,
            );
            let response = FindResourcesResponse {
                resources: part.to_vec(),
                server_sort_order: String::new(),
            };
            self.base.send(reply, &response).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolHandler for DiscoveryQueryStoreHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn capabilities(&self) -> HashMap<String, DataValue> {
        let mut caps = HashMap::new();
        caps.insert(
            "MaxResponseCount".to_string(),
            DataValue::Long(self.max_response_count as i64),
        );
        caps
    }

    async fn handle_protocol_message(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> EtpResult<Dispatch> {
        match header.message_type {
            discovery_query::FIND_RESOURCES => {
                self.handle_find_resources(header, body.decode()?).await?;
                Ok(Dispatch::Handled)
            }
            _ => Ok(Dispatch::Unhandled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, Envelope, Frame};
    use crate::session::Session;
    use crate::transport::TransportSender;
    use etpkit_types::config::{Encoding, SessionConfig};
    use etpkit_types::protocol::common;
    use etpkit_types::{ErrorCode, EtpError};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ChannelSender(mpsc::UnboundedSender<Frame>);

    #[async_trait]
    impl TransportSender for ChannelSender {
        async fn send(&mut self, frame: Frame) -> EtpResult<()> {
            self.0
                .send(frame)
                .map_err(|e| EtpError::Transport(e.to_string()))
        }

        async fn close(&mut self, _reason: &str) -> EtpResult<()> {
            Ok(())
        }
    }

    struct Wells(usize);

    #[async_trait]
    impl ResourceProvider for Wells {
        async fn find_resources(&self, uri: &str) -> EtpResult<Vec<Resource>> {
            if !uri.starts_with("eml:///") {
                return Err(EtpError::InvalidArgument(format!("bad uri {uri}")));
            }
            Ok((0..self.0).map(|i| resource(&format!("{uri}well({i})"))).collect())
        }
    }

    fn resource(uri: &str) -> Resource {
        Resource {
            uri: uri.to_string(),
            name: uri.to_string(),
            content_type: "application/x-witsml+xml;version=2.0;type=Well".to_string(),
            last_changed: 0,
            custom_data: HashMap::new(),
        }
    }

    fn customer_session() -> (
        Arc<Session>,
        Arc<DiscoveryQueryCustomerHandler>,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(DiscoveryQueryCustomerHandler::new());
        let session = Session::builder(SessionConfig::default())
            .handler(handler.clone())
            .build(Box::new(ChannelSender(tx)))
            .unwrap();
        session.open().unwrap();
        (session, handler, rx)
    }

    fn store_session(resources: usize, max: usize) -> (Arc<Session>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler =
            DiscoveryQueryStoreHandler::new(Arc::new(Wells(resources))).with_max_response_count(max);
        let config = SessionConfig {
            role: Role::Server,
            ..SessionConfig::default()
        };
        let session = Session::builder(config)
            .handler(Arc::new(handler))
            .build(Box::new(ChannelSender(tx)))
            .unwrap();
        session.open().unwrap();
        (session, rx)
    }

    fn response_frame(correlation_id: i64, flags: MessageFlags, uri: &str) -> Frame {
        let mut header = MessageHeader::new(
            protocols::DISCOVERY_QUERY,
            discovery_query::FIND_RESOURCES_RESPONSE,
            correlation_id,
            flags,
        );
        header.message_id = 100 + correlation_id;
        Codec::new(Encoding::Binary)
            .encode(
                &header,
                &FindResourcesResponse {
                    resources: vec![resource(uri)],
                    server_sort_order: String::new(),
                },
            )
            .unwrap()
    }

    fn request_frame(message_id: i64, uri: &str) -> Frame {
        let mut header = MessageHeader::new(
            protocols::DISCOVERY_QUERY,
            discovery_query::FIND_RESOURCES,
            0,
            MessageFlags::NONE,
        );
        header.message_id = message_id;
        Codec::new(Encoding::Binary)
            .encode(&header, &FindResources { uri: uri.to_string() })
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_resources_records_uri_before_send() {
        let (_session, handler, mut rx) = customer_session();
        let id = handler.find_resources("eml:///").await.unwrap();

        assert_eq!(handler.pending().get(id).as_deref(), Some("eml:///"));
        let sent: Envelope<FindResources> = Envelope::from_frame(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent.header.message_id, id);
        assert_eq!(sent.body.uri, "eml:///");
    }

    #[tokio::test]
    async fn test_multi_part_response_keeps_context_until_final() {
        let (session, handler, _rx) = customer_session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handler.on_find_resources_response.subscribe(move |event| {
            sink.lock().unwrap().push(event.context.clone());
            Ok(())
        });

        let id = handler.find_resources("eml:///").await.unwrap();
        session
            .dispatch(&response_frame(id, MessageFlags::MULTI_PART, "a"))
            .await
            .unwrap();
        session
            .dispatch(&response_frame(id, MessageFlags::MULTI_PART, "b"))
            .await
            .unwrap();
        assert!(handler.pending().contains(id));
        session
            .dispatch(&response_frame(id, MessageFlags::MULTI_PART_AND_FINAL_PART, "c"))
            .await
            .unwrap();

        assert!(!handler.pending().contains(id));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|c| c.as_deref() == Some("eml:///")));
    }

    #[tokio::test]
    async fn test_no_data_acknowledge_releases_once() {
        let (session, handler, _rx) = customer_session();
        let late = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&late);
        handler.on_find_resources_response.subscribe(move |event| {
            sink.lock().unwrap().push(event.context.clone());
            Ok(())
        });
        let acks = Arc::new(Mutex::new(0));
        let ack_sink = Arc::clone(&acks);
        handler.base().on_acknowledge.subscribe(move |_| {
            *ack_sink.lock().unwrap() += 1;
            Ok(())
        });

        let id = handler.find_resources("eml:///empty").await.unwrap();
        let mut header = MessageHeader::new(
            protocols::DISCOVERY_QUERY,
            common::ACKNOWLEDGE,
            id,
            MessageFlags::NO_DATA,
        );
        header.message_id = 50;
        let ack = Codec::new(Encoding::Binary)
            .encode(&header, &Acknowledge {})
            .unwrap();
        session.dispatch(&ack).await.unwrap();
        assert!(!handler.pending().contains(id));
        assert_eq!(*acks.lock().unwrap(), 1);

        session
            .dispatch(&response_frame(id, MessageFlags::FINAL_PART, "late"))
            .await
            .unwrap();
        assert_eq!(*late.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_exception_releases_pending_request() {
        let (session, handler, _rx) = customer_session();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        handler.base().on_protocol_exception.subscribe(move |event| {
            sink.lock().unwrap().push(event.header.correlation_id);
            Ok(())
        });

        let failed = handler.find_resources("witsml://bad").await.unwrap();
        let other = handler.find_resources("eml:///").await.unwrap();
        let mut header = MessageHeader::new(
            protocols::DISCOVERY_QUERY,
            common::PROTOCOL_EXCEPTION,
            failed,
            MessageFlags::NONE,
        );
        header.message_id = 70;
        let frame = Codec::new(Encoding::Binary)
            .encode(
                &header,
                &ProtocolException::new(ErrorCode::InvalidArgument, "bad uri witsml://bad"),
            )
            .unwrap();
        session.dispatch(&frame).await.unwrap();

        assert!(!handler.pending().contains(failed));
        assert!(handler.pending().contains(other));
        assert_eq!(handler.pending().len(), 1);
        assert_eq!(*errors.lock().unwrap(), vec![failed]);
    }

    #[tokio::test]
    async fn test_store_answers_in_parts() {
        let (session, mut rx) = store_session(5, 2);
        session.dispatch(&request_frame(7, "eml:///")).await.unwrap();

        let mut flags = Vec::new();
        let mut total = 0;
        while let Ok(frame) = rx.try_recv() {
            let reply: Envelope<FindResourcesResponse> = Envelope::from_frame(&frame).unwrap();
            assert_eq!(reply.header.correlation_id, 7);
            flags.push(reply.header.message_flags);
            total += reply.body.resources.len();
        }
        assert_eq!(total, 5);
        assert_eq!(
            flags,
            vec![
                MessageFlags::MULTI_PART,
                MessageFlags::MULTI_PART,
                MessageFlags::MULTI_PART_AND_FINAL_PART,
            ]
        );
    }

    #[tokio::test]
    async fn test_store_single_part_is_final() {
        let (session, mut rx) = store_session(1, 10);
        session.dispatch(&request_frame(3, "eml:///")).await.unwrap();
        let reply: Envelope<FindResourcesResponse> =
            Envelope::from_frame(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply.header.message_flags, MessageFlags::FINAL_PART);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_store_empty_result_is_no_data_ack() {
        let (session, mut rx) = store_session(0, 10);
        session.dispatch(&request_frame(4, "eml:///")).await.unwrap();
        let reply: Envelope<Acknowledge> = Envelope::from_frame(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply.header.message_type, common::ACKNOWLEDGE);
        assert_eq!(reply.header.correlation_id, 4);
        assert!(reply.header.is_no_data());
    }

    #[tokio::test]
    async fn test_store_provider_error_becomes_exception() {
        let (session, mut rx) = store_session(3, 10);
        session.dispatch(&request_frame(9, "witsml://x")).await.unwrap();
        let reply: Envelope<ProtocolException> =
            Envelope::from_frame(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply.body.error_code, ErrorCode::InvalidArgument.code());
        assert_eq!(reply.header.correlation_id, 9);
        assert!(session.is_open());
    }

    #[test]
    fn test_store_advertises_max_response_count() {
        let handler = DiscoveryQueryStoreHandler::new(Arc::new(Wells(0))).with_max_response_count(25);
        assert_eq!(
            handler.capabilities().get("MaxResponseCount"),
            Some(&DataValue::Long(25))
        );
    }
}
