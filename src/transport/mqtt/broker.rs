//! The seam between the transport adapter and an MQTT5 client
//!
//! Every broker operation returns immediately with a [`Completion`] that
//! resolves exactly once, either when the client has accepted the request or
//! with the error that prevented it.

use super::connection::BrokerError;
use crate::protocol::UserProperties;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// User property naming the listener a SUBSCRIBE/UNSUBSCRIBE belongs to
pub const LISTENER_ID_PROPERTY: &str = "listenerId";

/// An outbound PUBLISH, always sent with QoS 1 and without retain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
    pub user_properties: UserProperties,
    /// Broker-side message expiry in seconds
    pub message_expiry_interval: Option<u32>,
}

/// A PUBLISH delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Bytes,
    pub user_properties: UserProperties,
}

/// Invoked on the client's receive task for each matching inbound publish
pub type InboundCallback = Arc<dyn Fn(InboundPublish) + Send + Sync>;

/// Sending half of a [`Completion`]
pub type CompletionSender = oneshot::Sender<Result<(), BrokerError>>;

/// Eventual outcome of a broker operation
///
/// Dropping the sending half without resolving yields [`BrokerError::Cancelled`].
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<(), BrokerError>>,
}

impl Completion {
    /// A pending completion and the sender that resolves it
    pub fn channel() -> (CompletionSender, Completion) {
        let (tx, rx) = oneshot::channel();
        (tx, Completion { rx })
    }

    /// A completion that is already resolved
    pub fn ready(result: Result<(), BrokerError>) -> Self {
        let (tx, completion) = Self::channel();
        let _ = tx.send(result);
        completion
    }
}

impl Future for Completion {
    type Output = Result<(), BrokerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BrokerError::Cancelled)))
    }
}

/// Operations the transport needs from an MQTT5 client
pub trait BrokerClient: Send + Sync {
    /// Publish with QoS 1
    fn publish(&self, request: PublishRequest) -> Completion;

    /// Subscribe to `filter` and route matching publishes to `on_message`
    ///
    /// Registrations are tracked per `(filter, listenerId)`; the listener id
    /// is read from `user_properties`.
    fn subscribe(
        &self,
        filter: &str,
        user_properties: UserProperties,
        on_message: InboundCallback,
    ) -> Completion;

    /// Remove the `(filter, listenerId)` registration
    fn unsubscribe(&self, filter: &str, user_properties: UserProperties) -> Completion;

    /// Fire-and-forget disconnect
    fn disconnect(&self);
}

/// Listener id carried in a property list, empty when absent
pub fn listener_id_of(user_properties: &[(String, String)]) -> &str {
    user_properties
        .iter()
        .find(|(key, _)| key == LISTENER_ID_PROPERTY)
        .map(|(_, value)| value.as_str())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_completion() {
        assert_eq!(Completion::ready(Ok(())).await, Ok(()));
        assert_eq!(
            Completion::ready(Err(BrokerError::Client("queue full".into()))).await,
            Err(BrokerError::Client("queue full".into()))
        );
    }

    #[tokio::test]
    async fn test_completion_resolved_later() {
        let (tx, completion) = Completion::channel();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let _ = tx.send(Ok(()));
        });
        assert_eq!(completion.await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_sender_cancels() {
        let (tx, completion) = Completion::channel();
        drop(tx);
        assert_eq!(completion.await, Err(BrokerError::Cancelled));
    }

    #[test]
    fn test_listener_id_of() {
        let props = vec![
            ("0".to_string(), "1".to_string()),
            (LISTENER_ID_PROPERTY.to_string(), "7".to_string()),
        ];
        assert_eq!(listener_id_of(&props), "7");
        assert_eq!(listener_id_of(&[]), "");
    }
}
