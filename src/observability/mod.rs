//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{LogFormat, init_default_logging, init_logging, parse_level};

// Span macros for structured logging
pub use logging::{mqtt_span, transport_span};
