//! Endpoint addresses (`UUri`) and their canonical string form
//!
//! A `UUri` names a logical producer or consumer: an authority (device or
//! cloud host), a software entity with its major version, and a resource of
//! that entity. The same type doubles as a subscription filter, in which case
//! any field may carry its wildcard sentinel.
//!
//! An empty authority names the local authority and is written in the short
//! `/ENTITY/VERSION/RESOURCE` form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Authority name that matches any authority
pub const WILDCARD_AUTHORITY: &str = "*";
/// Entity id that matches any entity
pub const WILDCARD_ENTITY_ID: u32 = 0xFFFF;
/// Major version that matches any version
pub const WILDCARD_ENTITY_VERSION: u8 = 0xFF;
/// Resource id that matches any resource
pub const WILDCARD_RESOURCE_ID: u16 = 0xFFFF;

/// Lowest resource id of the topic range used by publishers
pub const MIN_TOPIC_ID: u16 = 0x8000;
/// Highest resource id of the RPC method range
pub const MAX_METHOD_ID: u16 = 0x7FFF;

const SCHEME_PREFIX: &str = "up:";

/// Endpoint address of a message producer or consumer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UUri {
    pub authority_name: String,
    pub ue_id: u32,
    pub ue_version_major: u8,
    pub resource_id: u16,
}

/// URI parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum UriError {
    #[error("URI must start with '/' or '//': {0}")]
    MissingAuthority(String),
    #[error("URI must have exactly 4 segments (authority/entity/version/resource): {0}")]
    WrongSegmentCount(String),
    #[error("Invalid {field} segment '{value}'")]
    InvalidSegment { field: &'static str, value: String },
    #[error("Authority name cannot be empty")]
    EmptyAuthority,
}

impl UUri {
    pub fn new(
        authority_name: impl Into<String>,
        ue_id: u32,
        ue_version_major: u8,
        resource_id: u16,
    ) -> Self {
        Self {
            authority_name: authority_name.into(),
            ue_id,
            ue_version_major,
            resource_id,
        }
    }

    /// Filter address matching every endpoint
    pub fn any() -> Self {
        Self::new(
            WILDCARD_AUTHORITY,
            WILDCARD_ENTITY_ID,
            WILDCARD_ENTITY_VERSION,
            WILDCARD_RESOURCE_ID,
        )
    }

    pub fn has_wildcard_authority(&self) -> bool {
        self.authority_name == WILDCARD_AUTHORITY
    }

    pub fn has_wildcard_entity_id(&self) -> bool {
        self.ue_id == WILDCARD_ENTITY_ID
    }

    pub fn has_wildcard_version(&self) -> bool {
        self.ue_version_major == WILDCARD_ENTITY_VERSION
    }

    pub fn has_wildcard_resource_id(&self) -> bool {
        self.resource_id == WILDCARD_RESOURCE_ID
    }

    /// True when no field carries a wildcard sentinel
    pub fn is_wildcard_free(&self) -> bool {
        !(self.has_wildcard_authority()
            || self.has_wildcard_entity_id()
            || self.has_wildcard_version()
            || self.has_wildcard_resource_id())
    }

    /// Resource id 0 addresses the entity itself (RPC reply-to, notification sink)
    pub fn is_rpc_response(&self) -> bool {
        self.resource_id == 0
    }

    pub fn is_rpc_method(&self) -> bool {
        (1..=MAX_METHOD_ID).contains(&self.resource_id)
    }

    pub fn is_topic(&self) -> bool {
        self.resource_id >= MIN_TOPIC_ID && !self.has_wildcard_resource_id()
    }

    /// True for an address in the local authority
    pub fn is_local(&self) -> bool {
        self.authority_name.is_empty()
    }

    /// Serialize to `//authority/ENTITY/VERSION/RESOURCE`, or `/ENTITY/VERSION/RESOURCE` when local
    pub fn to_uri(&self) -> String {
        if self.is_local() {
            return format!(
                "/{:X}/{:X}/{:X}",
                self.ue_id, self.ue_version_major, self.resource_id
            );
        }
        format!(
            "//{}/{:X}/{:X}/{:X}",
            self.authority_name, self.ue_id, self.ue_version_major, self.resource_id
        )
    }

    /// Parse either form, with or without the `up:` scheme prefix
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let without_scheme = uri.strip_prefix(SCHEME_PREFIX).unwrap_or(uri);
        let (authority_name, path) = match without_scheme.strip_prefix("//") {
            Some(rest) => {
                let (authority, path) = rest
                    .split_once('/')
                    .ok_or_else(|| UriError::WrongSegmentCount(uri.to_string()))?;
                if authority.is_empty() {
                    return Err(UriError::EmptyAuthority);
                }
                (authority, path)
            }
            None => (
                "",
                without_scheme
                    .strip_prefix('/')
                    .ok_or_else(|| UriError::MissingAuthority(uri.to_string()))?,
            ),
        };

        let segments: Vec<&str> = path.split('/').collect();
        let [entity, version, resource] = segments[..] else {
            return Err(UriError::WrongSegmentCount(uri.to_string()));
        };

        Ok(Self {
            authority_name: authority_name.to_string(),
            ue_id: parse_hex(entity, "entity")?,
            ue_version_major: parse_hex(version, "version")?,
            resource_id: parse_hex(resource, "resource")?,
        })
    }
}

fn parse_hex<T: TryFrom<u32>>(value: &str, field: &'static str) -> Result<T, UriError> {
    let invalid = || UriError::InvalidSegment {
        field,
        value: value.to_string(),
    };

    // from_str_radix tolerates a leading '+', the URI grammar does not
    if value.is_empty() || value.starts_with('+') {
        return Err(invalid());
    }

    u32::from_str_radix(value, 16)
        .ok()
        .and_then(|parsed| T::try_from(parsed).ok())
        .ok_or_else(invalid)
}

impl fmt::Display for UUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for UUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
