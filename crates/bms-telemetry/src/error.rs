use thiserror::Error;

/// A telemetry value could not be rounded for publication.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("significant digits must be at least 1, got {0}")]
    InvalidPrecision(u32),
    #[error("rounding {value} to {digits} decimal places overflows")]
    Overflow { value: String, digits: i32 },
    #[error("rounding {value} to {digits} decimal places produced a non-finite result")]
    NonFinite { value: f64, digits: i32 },
    #[error("cannot parse rounded value {text:?}")]
    Parse { text: String },
}

/// An inbound bus message that cannot be turned into a device command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no subscription for topic {topic} (payload {payload:?})")]
    Unroutable { topic: String, payload: String },
    #[error("invalid payload {payload:?} on {topic}")]
    InvalidPayload { topic: String, payload: String },
}
