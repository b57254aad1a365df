//! Topic codec for the 9-level MQTT topic grammar
//!
//! ```text
//! <kind>/<src authority>/<src entity>/<src version>/<src resource>/<sink authority>/<sink entity>/<sink version>/<sink resource>
//! ```
//!
//! `kind` is `c` for sources in the cloud and `d` for devices. Entity and
//! resource ids are four lower-case hex digits, the version two. Publish
//! topics are always concrete; a missing sink leaves its four levels empty.
//! Subscription filters replace absent or wildcarded fields with `+`.
//! [`check_publish_address`] guards the addresses a publish topic is built from.

use super::uri::UUri;
use thiserror::Error;

/// Number of levels in every topic and filter
pub const TOPIC_LEVELS: usize = 9;
/// MQTT single-level wildcard
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Authority name that marks a cloud endpoint
pub const CLOUD_AUTHORITY: &str = "cloud";

const CLOUD_KIND: &str = "c";
const DEVICE_KIND: &str = "d";

/// Topic shape errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic '{topic}' has {levels} levels, expected {TOPIC_LEVELS}")]
    WrongLevelCount { topic: String, levels: usize },
    #[error("Authority '{authority}' must not contain '{character}'")]
    ReservedCharacter { authority: String, character: char },
    #[error("Address '{0}' must not contain wildcards")]
    WildcardAddress(String),
}

/// Characters an authority cannot carry into a topic level
const RESERVED_CHARACTERS: [char; 3] = ['/', '+', '#'];

/// The nine levels of a received topic, borrowed from the topic string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicLevels<'a> {
    pub client_kind: &'a str,
    pub source: [&'a str; 4],
    pub sink: [&'a str; 4],
}

/// Check that `uri` can appear in a publish topic
///
/// Publish topics are concrete, so wildcard sentinels are refused, and an
/// authority must not split a level or smuggle in an MQTT wildcard.
pub fn check_publish_address(uri: &UUri) -> Result<(), TopicError> {
    if let Some(character) = uri
        .authority_name
        .chars()
        .find(|c| RESERVED_CHARACTERS.contains(c))
    {
        return Err(TopicError::ReservedCharacter {
            authority: uri.authority_name.clone(),
            character,
        });
    }
    if !uri.is_wildcard_free() {
        return Err(TopicError::WildcardAddress(uri.to_uri()));
    }
    Ok(())
}

/// Client kind level for a source address; `+` when there is none
pub fn client_kind(source: Option<&UUri>) -> &'static str {
    match source {
        None => SINGLE_LEVEL_WILDCARD,
        Some(source) if source.authority_name == CLOUD_AUTHORITY => CLOUD_KIND,
        Some(_) => DEVICE_KIND,
    }
}

fn entity_level(ue_id: u32) -> String {
    format!("{ue_id:04x}")
}

fn version_level(version: u8) -> String {
    format!("{version:02x}")
}

fn resource_level(resource_id: u16) -> String {
    format!("{resource_id:04x}")
}

fn address_levels(uri: &UUri) -> [String; 4] {
    [
        uri.authority_name.clone(),
        entity_level(uri.ue_id),
        version_level(uri.ue_version_major),
        resource_level(uri.resource_id),
    ]
}

fn filter_levels(uri: Option<&UUri>) -> [String; 4] {
    let Some(uri) = uri else {
        return std::array::from_fn(|_| SINGLE_LEVEL_WILDCARD.to_string());
    };

    let pick = |is_wildcard: bool, literal: String| {
        if is_wildcard {
            SINGLE_LEVEL_WILDCARD.to_string()
        } else {
            literal
        }
    };

    [
        pick(uri.has_wildcard_authority(), uri.authority_name.clone()),
        pick(uri.has_wildcard_entity_id(), entity_level(uri.ue_id)),
        pick(uri.has_wildcard_version(), version_level(uri.ue_version_major)),
        pick(uri.has_wildcard_resource_id(), resource_level(uri.resource_id)),
    ]
}

/// Build the exact topic a message from `source` to `sink` is published on
pub fn build_publish_topic(source: &UUri, sink: Option<&UUri>) -> String {
    let sink_levels = match sink {
        Some(sink) => address_levels(sink),
        None => Default::default(),
    };

    let mut levels = Vec::with_capacity(TOPIC_LEVELS);
    levels.push(client_kind(Some(source)).to_string());
    levels.extend(address_levels(source));
    levels.extend(sink_levels);
    levels.join("/")
}

/// Build the subscription filter for optional source and sink filter addresses
pub fn build_filter(source_filter: Option<&UUri>, sink_filter: Option<&UUri>) -> String {
    let mut levels = Vec::with_capacity(TOPIC_LEVELS);
    levels.push(client_kind(source_filter).to_string());
    levels.extend(filter_levels(source_filter));
    levels.extend(filter_levels(sink_filter));
    levels.join("/")
}

/// Check that a received topic follows the 9-level grammar
pub fn parse_publish_topic(topic: &str) -> Result<TopicLevels<'_>, TopicError> {
    let levels: Vec<&str> = topic.split('/').collect();
    if levels.len() != TOPIC_LEVELS {
        return Err(TopicError::WrongLevelCount {
            topic: topic.to_string(),
            levels: levels.len(),
        });
    }

    Ok(TopicLevels {
        client_kind: levels[0],
        source: [levels[1], levels[2], levels[3], levels[4]],
        sink: [levels[5], levels[6], levels[7], levels[8]],
    })
}
