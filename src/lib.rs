//! uProtocol transport over MQTT 5
//!
//! Carries uProtocol messages across an MQTT 5 broker. Message attributes
//! travel as MQTT user properties and the source and sink addresses are
//! encoded into a fixed nine-level topic, so brokers can route on them and
//! subscribers can filter with ordinary `+` wildcards.
//!
//! # Overview
//!
//! - [`protocol`] - addresses, attributes, messages and the two wire codecs
//! - [`transport`] - the [`UTransport`] contract and its MQTT5 adapter
//! - [`transport::mqtt`] - the rumqttc-based broker client
//! - [`config`] - TOML configuration
//! - [`observability`] - tracing setup
//!
//! # Quick Start
//!
//! ```rust
//! use up_mqtt5_transport::protocol::{metadata, topics, UMessageBuilder, UUri};
//!
//! let topic = UUri::new("device1", 0x100, 1, 0x8000);
//! let message = UMessageBuilder::publish(topic.clone()).with_ttl(5000).build();
//!
//! assert_eq!(
//!     topics::build_publish_topic(&topic, None),
//!     "d/device1/0100/01/8000////"
//! );
//! let properties = metadata::encode(&message.attributes);
//! assert_eq!(metadata::decode(&properties), message.attributes);
//! ```
//!
//! Against a broker:
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use up_mqtt5_transport::{TransportConfig, TransportFactory, UMessage, UTransport};
//!
//! # tokio_test::block_on(async {
//! let config = TransportConfig::load_from_file(Path::new("transport.toml"))?;
//! let transport = TransportFactory::connect(&config).await?;
//!
//! let listener = Arc::new(|message: UMessage| println!("{:?}", message.attributes.source));
//! let handle = transport.register_listener(None, None, listener).await?;
//! // ...
//! transport.unregister_listener(&handle).await;
//! transport.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, MqttSection, SourceSection, TransportConfig};
pub use error::{TransportError, TransportResult};
pub use protocol::*;
pub use transport::{
    ListenerHandle, ListenerId, Mqtt5Transport, PendingStatus, TransportFactory, UListener,
    UTransport,
};
