//! Message model and wire codecs
//!
//! This module holds the structured message model (addresses, attributes,
//! messages, status) together with the two codecs that map it onto MQTT5:
//! the topic grammar and the user-property metadata scheme.

pub mod attributes;
pub mod ids;
pub mod metadata;
pub mod topics;
pub mod uri;
pub mod validator;

pub use attributes::*;
pub use metadata::UserProperties;
pub use topics::{TopicError, TopicLevels};
pub use uri::{UUri, UriError};
pub use validator::{UAttributesValidator, ValidationResult};
