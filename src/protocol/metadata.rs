//! Attribute codec: `UAttributes` <-> MQTT5 user properties
//!
//! Every attribute travels as one user property under a short numeric key.
//! The vocabulary is versioned through the marker entry `"0" -> "1"`.
//!
//! | key | attribute        | value                     |
//! |-----|------------------|---------------------------|
//! | 0   | scheme version   | `1`                       |
//! | 1   | id               | UUID string               |
//! | 2   | message type     | decimal ordinal           |
//! | 3   | source           | serialized URI            |
//! | 4   | sink             | serialized URI            |
//! | 5   | priority         | decimal ordinal           |
//! | 6   | ttl (ms)         | decimal                   |
//! | 7   | permission level | decimal                   |
//! | 8   | comm status      | decimal ordinal           |
//! | 9   | request id       | UUID string               |
//! | 10  | token            | raw string                |
//! | 11  | traceparent      | raw string                |
//! | 12  | payload format   | decimal ordinal           |
//!
//! Absent attributes and attributes at their unspecified default are not
//! written. Decoding skips values it cannot parse and ignores unknown keys.

use super::attributes::{UAttributes, UCode, UMessageType, UPayloadFormat, UPriority};
use super::ids::{deserialize_id, serialize_id};
use super::uri::UUri;
use tracing::{debug, warn};

/// MQTT5 user properties as carried by rumqttc
pub type UserProperties = Vec<(String, String)>;

pub const KEY_VERSION: &str = "0";
pub const KEY_ID: &str = "1";
pub const KEY_TYPE: &str = "2";
pub const KEY_SOURCE: &str = "3";
pub const KEY_SINK: &str = "4";
pub const KEY_PRIORITY: &str = "5";
pub const KEY_TTL: &str = "6";
pub const KEY_PERMISSION_LEVEL: &str = "7";
pub const KEY_COMMSTATUS: &str = "8";
pub const KEY_REQID: &str = "9";
pub const KEY_TOKEN: &str = "10";
pub const KEY_TRACEPARENT: &str = "11";
pub const KEY_PAYLOAD_FORMAT: &str = "12";

/// Value of the scheme version marker written by this encoder
pub const SCHEME_VERSION: &str = "1";

/// Encode attributes into user properties, ordered by key
pub fn encode(attributes: &UAttributes) -> UserProperties {
    let mut properties = vec![(KEY_VERSION.to_string(), SCHEME_VERSION.to_string())];
    let mut add = |key: &str, value: String| properties.push((key.to_string(), value));

    if let Some(id) = &attributes.id {
        add(KEY_ID, serialize_id(id));
    }
    if attributes.type_ != UMessageType::Unspecified {
        add(KEY_TYPE, attributes.type_.value().to_string());
    }
    if let Some(source) = &attributes.source {
        add(KEY_SOURCE, source.to_uri());
    }
    if let Some(sink) = &attributes.sink {
        add(KEY_SINK, sink.to_uri());
    }
    if attributes.priority != UPriority::Unspecified {
        add(KEY_PRIORITY, attributes.priority.value().to_string());
    }
    if let Some(ttl) = attributes.ttl {
        add(KEY_TTL, ttl.to_string());
    }
    if let Some(level) = attributes.permission_level {
        add(KEY_PERMISSION_LEVEL, level.to_string());
    }
    if let Some(code) = attributes.commstatus {
        add(KEY_COMMSTATUS, code.value().to_string());
    }
    if let Some(reqid) = &attributes.reqid {
        add(KEY_REQID, serialize_id(reqid));
    }
    if let Some(token) = &attributes.token {
        add(KEY_TOKEN, token.clone());
    }
    if let Some(traceparent) = &attributes.traceparent {
        add(KEY_TRACEPARENT, traceparent.clone());
    }
    if attributes.payload_format != UPayloadFormat::Unspecified {
        add(KEY_PAYLOAD_FORMAT, attributes.payload_format.value().to_string());
    }

    properties
}

/// Decode user properties into attributes
///
/// Never fails: a malformed value is skipped and the attribute keeps whatever
/// it held before, unset unless an earlier property set it.
pub fn decode(properties: &[(String, String)]) -> UAttributes {
    let mut attributes = UAttributes::default();

    for (key, value) in properties {
        match key.as_str() {
            KEY_VERSION => {
                if value != SCHEME_VERSION {
                    debug!(version = %value, "Decoding metadata of a different scheme version");
                }
            }
            KEY_ID => {
                if let Some(id) = parse_id(key, value) {
                    attributes.id = Some(id);
                }
            }
            KEY_TYPE => {
                if let Some(type_) = parse_ordinal(key, value, UMessageType::from_value) {
                    attributes.type_ = type_;
                }
            }
            KEY_SOURCE => {
                if let Some(source) = parse_uri(key, value) {
                    attributes.source = Some(source);
                }
            }
            KEY_SINK => {
                if let Some(sink) = parse_uri(key, value) {
                    attributes.sink = Some(sink);
                }
            }
            KEY_PRIORITY => {
                if let Some(priority) = parse_ordinal(key, value, UPriority::from_value) {
                    attributes.priority = priority;
                }
            }
            KEY_TTL => {
                if let Some(ttl) = parse_number(key, value) {
                    attributes.ttl = Some(ttl);
                }
            }
            KEY_PERMISSION_LEVEL => {
                if let Some(level) = parse_number(key, value) {
                    attributes.permission_level = Some(level);
                }
            }
            KEY_COMMSTATUS => {
                if let Some(code) = parse_ordinal(key, value, UCode::from_value) {
                    attributes.commstatus = Some(code);
                }
            }
            KEY_REQID => {
                if let Some(reqid) = parse_id(key, value) {
                    attributes.reqid = Some(reqid);
                }
            }
            KEY_TOKEN => attributes.token = Some(value.clone()),
            KEY_TRACEPARENT => attributes.traceparent = Some(value.clone()),
            KEY_PAYLOAD_FORMAT => {
                if let Some(format) = parse_ordinal(key, value, UPayloadFormat::from_value) {
                    attributes.payload_format = format;
                }
            }
            _ => warn!(key = %key, "Ignoring unknown user property"),
        }
    }

    attributes
}

fn parse_number(key: &str, value: &str) -> Option<u32> {
    value
        .parse()
        .map_err(|_| debug!(key, value, "User property value is not a number"))
        .ok()
}

fn parse_ordinal<T>(key: &str, value: &str, from_value: fn(i32) -> Option<T>) -> Option<T> {
    let ordinal: i32 = value
        .parse()
        .map_err(|_| debug!(key, value, "User property value is not a number"))
        .ok()?;
    let parsed = from_value(ordinal);
    if parsed.is_none() {
        debug!(key, ordinal, "Unknown ordinal in user property");
    }
    parsed
}

fn parse_id(key: &str, value: &str) -> Option<uuid::Uuid> {
    let id = deserialize_id(value);
    if id.is_none() {
        debug!(key, value, "User property value is not a UUID");
    }
    id
}

fn parse_uri(key: &str, value: &str) -> Option<UUri> {
    UUri::parse(value)
        .map_err(|e| debug!(key, value, error = %e, "User property value is not a URI"))
        .ok()
}
