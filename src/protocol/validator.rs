//! Attribute validation for outbound messages
//!
//! Each message type constrains which addresses must be present and which
//! resource range they must fall in. Inbound messages are never run through
//! these checks.

use super::attributes::{UAttributes, UMessageType};
use std::fmt;

/// Outcome of validating a set of attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Success,
    Failure(String),
}

impl ValidationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationResult::Success)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            ValidationResult::Success
        } else {
            ValidationResult::Failure(errors.join("; "))
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Success => f.write_str("success"),
            ValidationResult::Failure(reason) => f.write_str(reason),
        }
    }
}

/// Validator bound to one message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UAttributesValidator {
    expected_type: UMessageType,
}

impl UAttributesValidator {
    pub fn for_type(expected_type: UMessageType) -> Self {
        Self { expected_type }
    }

    /// Pick the validator matching the attributes' own type
    pub fn for_attributes(attributes: &UAttributes) -> Self {
        Self::for_type(attributes.type_)
    }

    pub fn validate(&self, attributes: &UAttributes) -> ValidationResult {
        if self.expected_type == UMessageType::Unspecified {
            return ValidationResult::Failure("message type must be set".to_string());
        }

        let mut errors = Vec::new();

        if attributes.type_ != self.expected_type {
            errors.push(format!(
                "wrong message type: expected {:?}, got {:?}",
                self.expected_type, attributes.type_
            ));
        }
        if attributes.id.is_none() {
            errors.push("missing id".to_string());
        }

        match self.expected_type {
            UMessageType::Publish => Self::check_publish(attributes, &mut errors),
            UMessageType::Notification => Self::check_notification(attributes, &mut errors),
            UMessageType::Request => Self::check_request(attributes, &mut errors),
            UMessageType::Response => Self::check_response(attributes, &mut errors),
            UMessageType::Unspecified => {}
        }

        ValidationResult::from_errors(errors)
    }

    fn check_topic_source(attributes: &UAttributes, errors: &mut Vec<String>) {
        match &attributes.source {
            None => errors.push("missing source".to_string()),
            Some(source) if !source.is_topic() => errors.push(format!(
                "source resource id {:#06x} is not a topic",
                source.resource_id
            )),
            Some(_) => {}
        }
    }

    fn check_publish(attributes: &UAttributes, errors: &mut Vec<String>) {
        Self::check_topic_source(attributes, errors);
        if attributes.sink.is_some() {
            errors.push("publish messages must not have a sink".to_string());
        }
    }

    fn check_notification(attributes: &UAttributes, errors: &mut Vec<String>) {
        Self::check_topic_source(attributes, errors);
        match &attributes.sink {
            None => errors.push("missing sink".to_string()),
            Some(sink) if !sink.is_rpc_response() => {
                errors.push("notification sink must have resource id 0".to_string())
            }
            Some(_) => {}
        }
    }

    fn check_request(attributes: &UAttributes, errors: &mut Vec<String>) {
        match &attributes.source {
            None => errors.push("missing reply-to source".to_string()),
            Some(source) if !source.is_rpc_response() => {
                errors.push("request source must have resource id 0".to_string())
            }
            Some(_) => {}
        }
        match &attributes.sink {
            None => errors.push("missing method sink".to_string()),
            Some(sink) if !sink.is_rpc_method() => errors.push(format!(
                "sink resource id {:#06x} is not a method",
                sink.resource_id
            )),
            Some(_) => {}
        }
        match attributes.ttl {
            None | Some(0) => errors.push("request requires a positive ttl".to_string()),
            Some(_) => {}
        }
    }

    fn check_response(attributes: &UAttributes, errors: &mut Vec<String>) {
        match &attributes.source {
            None => errors.push("missing method source".to_string()),
            Some(source) if !source.is_rpc_method() => errors.push(format!(
                "source resource id {:#06x} is not a method",
                source.resource_id
            )),
            Some(_) => {}
        }
        match &attributes.sink {
            None => errors.push("missing reply-to sink".to_string()),
            Some(sink) if !sink.is_rpc_response() => {
                errors.push("response sink must have resource id 0".to_string())
            }
            Some(_) => {}
        }
        if attributes.reqid.is_none() {
            errors.push("missing request id".to_string());
        }
    }
}
