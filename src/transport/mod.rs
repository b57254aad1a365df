//! Transport layer for uProtocol messages
//!
//! [`UTransport`] is what applications program against. [`Mqtt5Transport`]
//! implements it on top of any [`mqtt::BrokerClient`].

use crate::error::TransportError;
use crate::protocol::{UMessage, UStatus, UUri};
use std::fmt;
use std::sync::Arc;

pub mod adapter;
pub mod mqtt;

pub use adapter::{Mqtt5Transport, PendingStatus, TransportFactory};

/// Receives inbound messages
///
/// Called on the broker client's receive task; implementations should hand
/// long work off elsewhere.
pub trait UListener: Send + Sync {
    fn on_receive(&self, message: UMessage);
}

impl<F> UListener for F
where
    F: Fn(UMessage) + Send + Sync,
{
    fn on_receive(&self, message: UMessage) {
        self(message)
    }
}

/// Identifies one listener registration within a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by a successful registration; required to unregister
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    pub(crate) id: ListenerId,
    pub(crate) topic_filter: String,
    pub(crate) source_filter: Option<UUri>,
    pub(crate) sink_filter: Option<UUri>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// MQTT topic filter the listener is subscribed on
    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    pub fn source_filter(&self) -> Option<&UUri> {
        self.source_filter.as_ref()
    }

    pub fn sink_filter(&self) -> Option<&UUri> {
        self.sink_filter.as_ref()
    }
}

/// Sends and receives uProtocol messages
#[async_trait::async_trait]
pub trait UTransport: Send + Sync {
    /// Send a message
    ///
    /// Attributes that fail validation are rejected with an error before any
    /// broker operation is issued. Otherwise the returned status reports the
    /// broker outcome: `OK` or `INTERNAL`.
    async fn send(&self, message: UMessage) -> Result<UStatus, TransportError>;

    /// Register a listener for messages matching the optional filters
    ///
    /// An absent filter address, or a wildcard field within one, matches
    /// anything at that position.
    async fn register_listener(
        &self,
        source_filter: Option<&UUri>,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<ListenerHandle, UStatus>;

    /// Remove a registration made by [`UTransport::register_listener`]
    async fn unregister_listener(&self, handle: &ListenerHandle) -> UStatus;

    /// Address of the local endpoint
    fn source(&self) -> &UUri;

    /// Disconnect from the broker; fire-and-forget
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_is_listener() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let listener: Arc<dyn UListener> = Arc::new(move |message: UMessage| {
            sink.lock().unwrap().push(message);
        });

        listener.on_receive(UMessage::default());
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_listener_id_display() {
        assert_eq!(ListenerId::new(42).to_string(), "42");
        assert!(ListenerId::new(1) < ListenerId::new(2));
    }
}
