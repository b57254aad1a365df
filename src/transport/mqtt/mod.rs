//! MQTT5 broker client
//!
//! The transport adapter talks to the broker through the [`BrokerClient`]
//! trait. [`RumqttcBroker`] is the production implementation.
//!
//! - [`broker`] - the client seam, completions and request types
//! - [`connection`] - connection state, backoff policy and rumqttc options
//! - [`health_monitor`] - pure reconnection decisions and state transitions
//! - [`message_handler`] - pure routing of rumqttc events and filter matching
//! - [`subscriptions`] - per-filter listener bookkeeping and SUBACK tracking
//! - [`client`] - the rumqttc event loop supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use up_mqtt5_transport::config::MqttSection;
//! use up_mqtt5_transport::transport::mqtt::{BrokerClient, PublishRequest, RumqttcBroker};
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection::with_broker_url("mqtt://localhost:1883");
//! let broker = RumqttcBroker::connect(&config).await?;
//! broker
//!     .publish(PublishRequest {
//!         topic: "d/device1/0100/01/8000////".to_string(),
//!         payload: "hello".into(),
//!         user_properties: vec![],
//!         message_expiry_interval: None,
//!     })
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod broker;
pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod subscriptions;

pub use broker::{
    BrokerClient, Completion, CompletionSender, InboundCallback, InboundPublish,
    LISTENER_ID_PROPERTY, PublishRequest,
};
pub use client::RumqttcBroker;
pub use connection::{BrokerError, ConnectionState, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use subscriptions::{
    PendingSubscribe, PendingSubscriptions, SubscribeWaiter, SubscriptionRegistry, Unregistration,
};
