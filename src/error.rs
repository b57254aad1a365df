//! Error types for the MQTT5 transport
//!
//! `TransportError` covers everything that fails *before* a broker operation is
//! issued. Failures reported by the broker itself never surface as errors;
//! they are folded into a `UStatus` with code `INTERNAL`.

use crate::config::ConfigError;
use crate::protocol::{UCode, UStatus};
use crate::transport::mqtt::BrokerError;
use thiserror::Error;

/// Main error type for transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid message attributes: {reason}")]
    InvalidAttributes { reason: String },

    #[error("Invalid transport source: {message}")]
    InvalidSource { message: String },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TransportError {
    /// Convert to the status code a transport caller would report
    pub fn to_status(&self) -> UStatus {
        match self {
            TransportError::InvalidAttributes { reason } => {
                UStatus::fail_with_code(UCode::InvalidArgument, reason.clone())
            }
            TransportError::InvalidSource { message } => {
                UStatus::fail_with_code(UCode::InvalidArgument, message.clone())
            }
            TransportError::Broker(_) => UStatus::from_code(UCode::Internal),
            TransportError::Config(e) => {
                UStatus::fail_with_code(UCode::FailedPrecondition, e.to_string())
            }
        }
    }

    /// Create invalid attributes error
    pub fn invalid_attributes<S: Into<String>>(reason: S) -> Self {
        Self::InvalidAttributes {
            reason: reason.into(),
        }
    }

    /// Create invalid source error
    pub fn invalid_source<S: Into<String>>(message: S) -> Self {
        Self::InvalidSource {
            message: message.into(),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
