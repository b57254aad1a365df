//! Message attributes, messages and operation status
//!
//! Enum ordinals are part of the wire vocabulary shared by every conformant
//! endpoint and must not be renumbered.

use super::ids::new_message_id;
use super::uri::UUri;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a wire enum with fixed ordinals plus `value`/`from_value` conversions
macro_rules! ordinal_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            #[default]
            $($variant = $value),+
        }

        impl $name {
            /// Wire ordinal
            pub fn value(self) -> i32 {
                self as i32
            }

            /// Look up a variant by wire ordinal
            pub fn from_value(value: i32) -> Option<Self> {
                match value {
                    $(v if v == $value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

ordinal_enum! {
    /// Kind of message, determines addressing semantics of source and sink
    pub enum UMessageType {
        Unspecified = 0,
        Publish = 1,
        Request = 2,
        Response = 3,
        Notification = 4,
    }
}

ordinal_enum! {
    /// Quality of service class
    pub enum UPriority {
        Unspecified = 0,
        Cs0 = 1,
        Cs1 = 2,
        Cs2 = 3,
        Cs3 = 4,
        Cs4 = 5,
        Cs5 = 6,
        Cs6 = 7,
    }
}

ordinal_enum! {
    /// Status codes, also carried as the comm status of RPC responses
    pub enum UCode {
        Ok = 0,
        Cancelled = 1,
        Unknown = 2,
        InvalidArgument = 3,
        DeadlineExceeded = 4,
        NotFound = 5,
        AlreadyExists = 6,
        PermissionDenied = 7,
        ResourceExhausted = 8,
        FailedPrecondition = 9,
        Aborted = 10,
        OutOfRange = 11,
        Unimplemented = 12,
        Internal = 13,
        Unavailable = 14,
        DataLoss = 15,
        Unauthenticated = 16,
    }
}

ordinal_enum! {
    /// Encoding of the message payload
    pub enum UPayloadFormat {
        Unspecified = 0,
        ProtobufWrappedInAny = 1,
        Protobuf = 2,
        Json = 3,
        Someip = 4,
        SomeipTlv = 5,
        Raw = 6,
        Text = 7,
        Shm = 8,
    }
}

/// Structured metadata attached to every message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UAttributes {
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub type_: UMessageType,
    pub source: Option<UUri>,
    pub sink: Option<UUri>,
    pub priority: UPriority,
    /// Time to live in milliseconds
    pub ttl: Option<u32>,
    pub permission_level: Option<u32>,
    pub commstatus: Option<UCode>,
    /// Id of the request a response answers
    pub reqid: Option<Uuid>,
    pub token: Option<String>,
    pub traceparent: Option<String>,
    pub payload_format: UPayloadFormat,
}

impl UAttributes {
    /// Broker-level message expiry in whole seconds, rounded up
    pub fn expiry_interval_secs(&self) -> Option<u32> {
        self.ttl.filter(|ttl| *ttl > 0).map(|ttl| ttl.div_ceil(1000))
    }
}

/// A message: attributes plus opaque payload bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UMessage {
    pub attributes: UAttributes,
    pub payload: Bytes,
}

impl UMessage {
    pub fn new(attributes: UAttributes, payload: impl Into<Bytes>) -> Self {
        Self {
            attributes,
            payload: payload.into(),
        }
    }

    pub fn source(&self) -> Option<&UUri> {
        self.attributes.source.as_ref()
    }

    pub fn sink(&self) -> Option<&UUri> {
        self.attributes.sink.as_ref()
    }
}

/// Result of an asynchronous transport operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UStatus {
    pub code: UCode,
    pub message: Option<String>,
}

impl UStatus {
    pub fn ok() -> Self {
        Self::from_code(UCode::Ok)
    }

    pub fn from_code(code: UCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn fail_with_code(code: UCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == UCode::Ok
    }
}

impl fmt::Display for UStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{:?}: {message}", self.code),
            None => write!(f, "{:?}", self.code),
        }
    }
}

impl std::error::Error for UStatus {}

/// Convenience builder for well-formed messages of each type
#[derive(Debug, Clone)]
pub struct UMessageBuilder {
    attributes: UAttributes,
}

impl UMessageBuilder {
    fn with_type(type_: UMessageType, source: UUri, sink: Option<UUri>) -> Self {
        Self {
            attributes: UAttributes {
                type_,
                source: Some(source),
                sink,
                ..Default::default()
            },
        }
    }

    /// Event published on a topic of the sender
    pub fn publish(topic: UUri) -> Self {
        Self::with_type(UMessageType::Publish, topic, None)
    }

    /// Event addressed to a single consumer
    pub fn notification(topic: UUri, destination: UUri) -> Self {
        Self::with_type(UMessageType::Notification, topic, Some(destination))
    }

    /// RPC request to `method`, answered at `reply_to`
    pub fn request(method: UUri, reply_to: UUri, ttl: u32) -> Self {
        let mut builder = Self::with_type(UMessageType::Request, reply_to, Some(method));
        builder.attributes.ttl = Some(ttl);
        builder
    }

    /// RPC response from `method` to `reply_to` for request `reqid`
    pub fn response(reply_to: UUri, reqid: Uuid, method: UUri) -> Self {
        let mut builder = Self::with_type(UMessageType::Response, method, Some(reply_to));
        builder.attributes.reqid = Some(reqid);
        builder
    }

    pub fn with_priority(mut self, priority: UPriority) -> Self {
        self.attributes.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.attributes.ttl = Some(ttl);
        self
    }

    pub fn with_permission_level(mut self, level: u32) -> Self {
        self.attributes.permission_level = Some(level);
        self
    }

    pub fn with_comm_status(mut self, code: UCode) -> Self {
        self.attributes.commstatus = Some(code);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.attributes.token = Some(token.into());
        self
    }

    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.attributes.traceparent = Some(traceparent.into());
        self
    }

    /// Build a message without payload
    pub fn build(self) -> UMessage {
        self.build_with_payload(Bytes::new(), UPayloadFormat::Unspecified)
    }

    /// Build a message carrying `payload`; a fresh id is assigned
    pub fn build_with_payload(
        mut self,
        payload: impl Into<Bytes>,
        format: UPayloadFormat,
    ) -> UMessage {
        self.attributes.id = Some(new_message_id());
        self.attributes.payload_format = format;
        UMessage::new(self.attributes, payload)
    }
}
