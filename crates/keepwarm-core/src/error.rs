//! Error types for decoding and configuration parsing.

use thiserror::Error;

/// Why a single event-stream record was dropped.
///
/// Never fatal: the decoder resynchronises at the next record boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("record is not valid UTF-8")]
    InvalidUtf8,

    #[error("record exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("record data is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("record carries no event kind")]
    MissingKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseDurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration number in {0:?}")]
    InvalidNumber(String),

    #[error("unknown duration unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },

    #[error("duration {0:?} overflows")]
    Overflow(String),
}
