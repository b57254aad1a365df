//! Message identifiers
//!
//! Ids travel as the canonical lower-case hyphenated UUID string.

use uuid::Uuid;

/// Create a new time-ordered message id
pub fn new_message_id() -> Uuid {
    Uuid::now_v7()
}

/// Serialize an id to its 36 character wire form
pub fn serialize_id(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

/// Parse an id from its wire form
pub fn deserialize_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value).ok()
}
