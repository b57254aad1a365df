//! MQTT5 binding of the transport contract
//!
//! Outbound messages are validated, their attributes encoded as user
//! properties and published on the topic derived from source and sink.
//! Listeners subscribe on a filter derived from optional source and sink
//! addresses; inbound publishes are decoded back into messages.

use super::mqtt::{
    BrokerClient, BrokerError, Completion, InboundCallback, InboundPublish, LISTENER_ID_PROPERTY,
    PublishRequest, RumqttcBroker,
};
use super::{ListenerHandle, ListenerId, UListener, UTransport};
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::protocol::{
    UAttributesValidator, UCode, UMessage, UStatus, UUri, UserProperties, ValidationResult,
    metadata, topics,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tracing::{Instrument, debug, error, info, warn};

/// Status of a broker operation that has been issued but may not have finished
///
/// Resolves to `OK` on success and `INTERNAL` on any broker failure.
#[derive(Debug)]
pub struct PendingStatus {
    operation: &'static str,
    completion: Completion,
}

impl PendingStatus {
    fn new(operation: &'static str, completion: Completion) -> Self {
        Self {
            operation,
            completion,
        }
    }
}

impl Future for PendingStatus {
    type Output = UStatus;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let operation = self.operation;
        Pin::new(&mut self.completion)
            .poll(cx)
            .map(|result| completion_status(operation, result))
    }
}

fn completion_status(operation: &str, result: Result<(), BrokerError>) -> UStatus {
    match result {
        Ok(()) => UStatus::ok(),
        Err(e) => {
            error!(operation, error = %e, "Broker operation failed");
            UStatus::from_code(UCode::Internal)
        }
    }
}

fn listener_properties(id: ListenerId) -> UserProperties {
    vec![(LISTENER_ID_PROPERTY.to_string(), id.to_string())]
}

/// Turn an inbound publish into a message for `listener`
///
/// Returns false if the publish was dropped.
fn deliver(listener: &dyn UListener, publish: InboundPublish) -> bool {
    if let Err(e) = topics::parse_publish_topic(&publish.topic) {
        warn!(error = %e, "Dropping inbound publish with malformed topic");
        return false;
    }

    let attributes = metadata::decode(&publish.user_properties);
    listener.on_receive(UMessage::new(attributes, publish.payload));
    true
}

/// uProtocol transport over an MQTT5 broker
pub struct Mqtt5Transport {
    source: UUri,
    client: Arc<dyn BrokerClient>,
    last_listener_id: AtomicU64,
}

impl Mqtt5Transport {
    fn new(source: UUri, client: Arc<dyn BrokerClient>) -> Self {
        Self {
            source,
            client,
            last_listener_id: AtomicU64::new(0),
        }
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId::new(self.last_listener_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Validate and issue the publish for `message`
    ///
    /// Invalid attributes are rejected here, before the broker sees anything.
    /// The returned status resolves once the broker client has finished.
    pub fn dispatch(&self, message: UMessage) -> TransportResult<PendingStatus> {
        let attributes = &message.attributes;
        if let ValidationResult::Failure(reason) =
            UAttributesValidator::for_attributes(attributes).validate(attributes)
        {
            warn!(reason = %reason, "Rejecting message with invalid attributes");
            return Err(TransportError::invalid_attributes(reason));
        }

        let source = attributes
            .source
            .as_ref()
            .ok_or_else(|| TransportError::invalid_attributes("missing source"))?;
        for address in std::iter::once(source).chain(attributes.sink.as_ref()) {
            if let Err(e) = topics::check_publish_address(address) {
                warn!(error = %e, "Rejecting message with unpublishable address");
                return Err(TransportError::invalid_attributes(e.to_string()));
            }
        }
        let request = PublishRequest {
            topic: topics::build_publish_topic(source, attributes.sink.as_ref()),
            user_properties: metadata::encode(attributes),
            message_expiry_interval: attributes.expiry_interval_secs(),
            payload: message.payload,
        };

        debug!(
            topic = %request.topic,
            expiry_secs = ?request.message_expiry_interval,
            payload_len = request.payload.len(),
            "Publishing message"
        );
        Ok(PendingStatus::new("publish", self.client.publish(request)))
    }
}

#[async_trait::async_trait]
impl UTransport for Mqtt5Transport {
    async fn send(&self, message: UMessage) -> Result<UStatus, TransportError> {
        let pending = self.dispatch(message)?;
        Ok(pending.await)
    }

    async fn register_listener(
        &self,
        source_filter: Option<&UUri>,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<ListenerHandle, UStatus> {
        let handle = ListenerHandle {
            id: self.next_listener_id(),
            topic_filter: topics::build_filter(source_filter, sink_filter),
            source_filter: source_filter.cloned(),
            sink_filter: sink_filter.cloned(),
        };

        let span = crate::transport_span!(
            operation = "register_listener",
            listener_id = handle.id.value(),
            filter = %handle.topic_filter
        );
        async {
            let on_message: InboundCallback = Arc::new(move |publish: InboundPublish| {
                deliver(listener.as_ref(), publish);
            });
            let status = PendingStatus::new(
                "subscribe",
                self.client.subscribe(
                    &handle.topic_filter,
                    listener_properties(handle.id),
                    on_message,
                ),
            )
            .await;

            if status.is_ok() {
                info!("Listener registered");
                Ok(handle)
            } else {
                Err(status)
            }
        }
        .instrument(span)
        .await
    }

    async fn unregister_listener(&self, handle: &ListenerHandle) -> UStatus {
        let span = crate::transport_span!(
            operation = "unregister_listener",
            listener_id = handle.id.value(),
            filter = %handle.topic_filter
        );
        async {
            let status = PendingStatus::new(
                "unsubscribe",
                self.client
                    .unsubscribe(&handle.topic_filter, listener_properties(handle.id)),
            )
            .await;
            if status.is_ok() {
                info!("Listener unregistered");
            }
            status
        }
        .instrument(span)
        .await
    }

    fn source(&self) -> &UUri {
        &self.source
    }

    fn close(&self) {
        info!(source = %self.source, "Closing transport");
        self.client.disconnect();
    }
}

/// Builds transports with a checked source address
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport for `source` on top of an existing broker client
    pub fn create(source: UUri, client: Arc<dyn BrokerClient>) -> TransportResult<Mqtt5Transport> {
        if source.authority_name.is_empty() {
            return Err(TransportError::invalid_source("source authority must not be empty"));
        }
        topics::check_publish_address(&source)
            .map_err(|e| TransportError::invalid_source(e.to_string()))?;
        Ok(Mqtt5Transport::new(source, client))
    }

    /// Connect to the configured broker and create a transport for the configured source
    pub async fn connect(config: &TransportConfig) -> TransportResult<Mqtt5Transport> {
        config.validate()?;
        let broker = RumqttcBroker::connect(&config.mqtt).await?;
        Self::create(config.source.to_uri(), Arc::new(broker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::metadata::{KEY_ID, KEY_SOURCE, KEY_TTL, KEY_TYPE, KEY_VERSION};
    use crate::protocol::{UMessageBuilder, UMessageType, UPayloadFormat, UPriority};
    use crate::testing::{MockBrokerClient, RecordingListener};
    use bytes::Bytes;

    fn device_topic() -> UUri {
        UUri::new("device1", 0x100, 1, 0x8000)
    }

    fn transport_with(client: Arc<MockBrokerClient>) -> Mqtt5Transport {
        TransportFactory::create(UUri::new("device1", 0x100, 1, 0), client).unwrap()
    }

    fn setup() -> (Arc<MockBrokerClient>, Mqtt5Transport) {
        let client = Arc::new(MockBrokerClient::new());
        let transport = transport_with(client.clone());
        (client, transport)
    }

    #[tokio::test]
    async fn test_send_publish_end_to_end() {
        let (client, transport) = setup();
        let message = UMessageBuilder::publish(device_topic())
            .with_ttl(5000)
            .build();
        let id = message.attributes.id.unwrap();

        let status = transport.send(message).await.unwrap();
        assert_eq!(status, UStatus::ok());

        let published = client.published();
        assert_eq!(published.len(), 1);
        let request = &published[0];
        assert_eq!(request.topic, "d/device1/0100/01/8000////");
        assert_eq!(request.message_expiry_interval, Some(5));
        assert_eq!(
            request.user_properties,
            vec![
                (KEY_VERSION.to_string(), "1".to_string()),
                (KEY_ID.to_string(), id.to_string()),
                (KEY_TYPE.to_string(), "1".to_string()),
                (KEY_SOURCE.to_string(), "//device1/100/1/8000".to_string()),
                (KEY_TTL.to_string(), "5000".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_without_ttl_has_no_expiry() {
        let (client, transport) = setup();
        let message = UMessageBuilder::publish(device_topic())
            .build_with_payload("temp=21", UPayloadFormat::Text);

        transport.send(message).await.unwrap();

        let request = &client.published()[0];
        assert_eq!(request.message_expiry_interval, None);
        assert_eq!(&request.payload[..], b"temp=21");
    }

    #[tokio::test]
    async fn test_send_rounds_expiry_up() {
        let (client, transport) = setup();
        let message = UMessageBuilder::publish(device_topic()).with_ttl(1500).build();
        transport.send(message).await.unwrap();
        assert_eq!(client.published()[0].message_expiry_interval, Some(2));
    }

    #[tokio::test]
    async fn test_send_notification_uses_sink_levels() {
        let (client, transport) = setup();
        let sink = UUri::new("cloud", 0xab, 2, 0);
        let message = UMessageBuilder::notification(device_topic(), sink).build();

        transport.send(message).await.unwrap();
        assert_eq!(
            client.published()[0].topic,
            "d/device1/0100/01/8000/cloud/00ab/02/0000"
        );
    }

    #[tokio::test]
    async fn test_send_rejects_addresses_that_break_the_topic() {
        let (client, transport) = setup();
        let sources = [
            UUri::new("*", 0xFFFF, 0xFF, 0x8000),
            UUri::new("dev/ice", 0x100, 1, 0x8000),
            UUri::new("dev+", 0x100, 1, 0x8000),
            UUri::new("dev#", 0x100, 1, 0x8000),
        ];
        for source in sources {
            let message = UMessageBuilder::publish(source.clone()).build();
            let result = transport.send(message).await;
            assert!(
                matches!(result, Err(TransportError::InvalidAttributes { .. })),
                "{source} should be rejected, got {result:?}"
            );
        }

        let wildcard_sink = UUri::new("cloud", 0xFFFF, 1, 0);
        let message = UMessageBuilder::notification(device_topic(), wildcard_sink).build();
        assert!(matches!(
            transport.send(message).await,
            Err(TransportError::InvalidAttributes { .. })
        ));

        assert!(client.published().is_empty());
    }

    #[tokio::test]
    async fn test_send_notification_to_local_sink() {
        let (client, transport) = setup();
        let message =
            UMessageBuilder::notification(device_topic(), UUri::new("", 0x300, 1, 0)).build();

        assert!(transport.send(message).await.unwrap().is_ok());
        assert_eq!(
            client.published()[0].topic,
            "d/device1/0100/01/8000//0300/01/0000"
        );
    }

    #[tokio::test]
    async fn test_invalid_attributes_rejected_before_broker() {
        let (client, transport) = setup();
        let mut message = UMessageBuilder::publish(device_topic()).build();
        message.attributes.id = None;

        let result = transport.send(message).await;
        let err = result.unwrap_err();
        assert!(matches!(err, TransportError::InvalidAttributes { .. }));
        assert_eq!(err.to_status().code, UCode::InvalidArgument);
        assert!(client.published().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_synchronously() {
        let (client, transport) = setup();
        let message = UMessage::default();

        assert!(transport.dispatch(message).is_err());
        assert!(client.published().is_empty());
    }

    #[test]
    fn test_dispatch_publishes_before_status_is_awaited() {
        use futures::FutureExt;

        let (client, transport) = setup();
        let pending = transport
            .dispatch(UMessageBuilder::publish(device_topic()).build())
            .unwrap();

        assert_eq!(client.published().len(), 1);
        assert_eq!(pending.now_or_never(), Some(UStatus::ok()));
    }

    #[tokio::test]
    async fn test_broker_failure_maps_to_internal() {
        let client = Arc::new(MockBrokerClient::with_failure());
        let transport = transport_with(client.clone());

        let message = UMessageBuilder::publish(device_topic()).build();
        let status = transport.send(message).await.unwrap();
        assert_eq!(status, UStatus::from_code(UCode::Internal));
        assert_eq!(status.message, None);
    }

    #[tokio::test]
    async fn test_register_listener_subscribes_with_listener_id() {
        let (client, transport) = setup();
        let listener = Arc::new(RecordingListener::new());

        let handle = transport
            .register_listener(Some(&device_topic()), None, listener)
            .await
            .unwrap();

        assert_eq!(handle.topic_filter(), "d/device1/0100/01/8000/+/+/+/+");
        assert_eq!(handle.source_filter(), Some(&device_topic()));
        assert_eq!(handle.sink_filter(), None);

        let subscriptions = client.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].0, handle.topic_filter());
        assert_eq!(
            subscriptions[0].1,
            vec![(LISTENER_ID_PROPERTY.to_string(), handle.id().to_string())]
        );
    }

    #[tokio::test]
    async fn test_listener_ids_are_unique() {
        let (_client, transport) = setup();
        let first = transport
            .register_listener(None, None, Arc::new(RecordingListener::new()))
            .await
            .unwrap();
        let second = transport
            .register_listener(None, None, Arc::new(RecordingListener::new()))
            .await
            .unwrap();

        assert_eq!(first.topic_filter(), second.topic_filter());
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_failed_subscribe_returns_internal() {
        let client = Arc::new(MockBrokerClient::with_failure());
        let transport = transport_with(client.clone());

        let result = transport
            .register_listener(None, None, Arc::new(RecordingListener::new()))
            .await;
        assert_eq!(result.unwrap_err(), UStatus::from_code(UCode::Internal));
    }

    #[tokio::test]
    async fn test_inbound_publish_reaches_listener() {
        let (client, transport) = setup();
        let listener = Arc::new(RecordingListener::new());
        transport
            .register_listener(Some(&device_topic()), None, listener.clone())
            .await
            .unwrap();

        let sent = UMessageBuilder::publish(device_topic())
            .with_priority(UPriority::Cs2)
            .with_ttl(800)
            .build_with_payload("hello", UPayloadFormat::Text);
        let delivered = client.deliver(
            "d/device1/0100/01/8000////",
            Bytes::from_static(b"hello"),
            metadata::encode(&sent.attributes),
        );
        assert_eq!(delivered, 1);

        let received = listener.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], sent);
        assert_eq!(received[0].attributes.type_, UMessageType::Publish);
    }

    #[tokio::test]
    async fn test_malformed_inbound_topics_are_dropped() {
        let (client, transport) = setup();
        let listener = Arc::new(RecordingListener::new());
        transport
            .register_listener(None, None, listener.clone())
            .await
            .unwrap();

        let attributes = UMessageBuilder::publish(device_topic()).build().attributes;
        for topic in ["d/device1/0100/01/8000///", "d/device1/0100/01/8000/////"] {
            client.deliver(topic, Bytes::new(), metadata::encode(&attributes));
        }
        assert_eq!(listener.count(), 0);

        // the subscription survives malformed traffic
        client.deliver(
            "d/device1/0100/01/8000////",
            Bytes::new(),
            metadata::encode(&attributes),
        );
        assert_eq!(listener.count(), 1);
    }

    #[test]
    fn test_deliver_rejects_wrong_level_counts() {
        let listener = RecordingListener::new();
        let publish = |topic: &str| InboundPublish {
            topic: topic.to_string(),
            payload: Bytes::new(),
            user_properties: Vec::new(),
        };

        assert!(!deliver(&listener, publish("a/b/c/d/e/f/g/h")));
        assert!(!deliver(&listener, publish("a/b/c/d/e/f/g/h/i/j")));
        assert!(deliver(&listener, publish("a/b/c/d/e/f/g/h/i")));
        assert_eq!(listener.count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_leaves_other_listeners_on_filter() {
        let (client, transport) = setup();
        let first = Arc::new(RecordingListener::new());
        let second = Arc::new(RecordingListener::new());

        let first_handle = transport
            .register_listener(Some(&device_topic()), None, first.clone())
            .await
            .unwrap();
        transport
            .register_listener(Some(&device_topic()), None, second.clone())
            .await
            .unwrap();

        let status = transport.unregister_listener(&first_handle).await;
        assert!(status.is_ok());
        assert_eq!(
            client.unsubscriptions(),
            vec![(
                first_handle.topic_filter().to_string(),
                vec![(
                    LISTENER_ID_PROPERTY.to_string(),
                    first_handle.id().to_string()
                )]
            )]
        );

        let attributes = UMessageBuilder::publish(device_topic()).build().attributes;
        client.deliver(
            "d/device1/0100/01/8000////",
            Bytes::new(),
            metadata::encode(&attributes),
        );
        assert_eq!(first.count(), 0);
        assert_eq!(second.count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_failure_maps_to_internal() {
        let (client, transport) = setup();
        let handle = transport
            .register_listener(None, None, Arc::new(RecordingListener::new()))
            .await
            .unwrap();

        client.set_should_fail(true);
        let status = transport.unregister_listener(&handle).await;
        assert_eq!(status.code, UCode::Internal);
    }

    #[tokio::test]
    async fn test_source_and_close() {
        let (client, transport) = setup();
        assert_eq!(transport.source(), &UUri::new("device1", 0x100, 1, 0));

        transport.close();
        assert!(client.is_disconnected());
    }

    #[test]
    fn test_factory_rejects_bad_sources() {
        let client: Arc<dyn BrokerClient> = Arc::new(MockBrokerClient::new());

        let empty = TransportFactory::create(UUri::new("", 1, 1, 0), client.clone());
        assert!(matches!(empty, Err(TransportError::InvalidSource { .. })));

        let wildcard = TransportFactory::create(UUri::new("device1", 0xFFFF, 1, 0), client.clone());
        assert!(matches!(wildcard, Err(TransportError::InvalidSource { .. })));

        let split = TransportFactory::create(UUri::new("dev/ice", 1, 1, 0), client);
        assert!(matches!(split, Err(TransportError::InvalidSource { .. })));
    }
}
