//! Error types for link, dispatch, codec and loader operations.
//!
//! Each subsystem surfaces its own error enum rather than funnelling through a
//! single catch-all type, so callers can match on exactly the failures an
//! operation can produce. Retry policy always belongs to the caller: nothing
//! in this crate retries internally.

use std::time::Duration;
use thiserror::Error;

/// Errors from the transport link and the underlying radio.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("no peripheral found: {reason}")]
    Unavailable { reason: String },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("no active connection")]
    NotConnected,

    #[error("connection lost: {context}")]
    LinkLost { context: String },

    #[error("payload of {size} bytes exceeds the single-packet limit of {max}")]
    PayloadTooLong { size: usize, max: usize },

    #[error("radio error: {reason}")]
    Radio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// A lost link mid-send leaves the peripheral in an undefined
    /// partial-receive state; the caller must resynchronize (reset signal)
    /// before retrying, so `LinkLost` is not classified as retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Unavailable { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Radio { .. } => true,
            LinkError::NotConnected => false,
            LinkError::LinkLost { .. } => false,
            LinkError::PayloadTooLong { .. } => false,
        }
    }

    /// Helper constructor for unavailable-peripheral errors.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        LinkError::Unavailable { reason: reason.into() }
    }

    /// Helper constructor for timeout errors.
    pub fn timeout(duration: Duration) -> Self {
        LinkError::Timeout { duration }
    }

    /// Helper constructor for lost-connection errors.
    pub fn link_lost(context: impl Into<String>) -> Self {
        LinkError::LinkLost { context: context.into() }
    }

    /// Helper constructor for radio errors without a source.
    pub fn radio(reason: impl Into<String>) -> Self {
        LinkError::Radio { reason: reason.into(), source: None }
    }

    /// Helper constructor for radio errors with a source.
    pub fn radio_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Radio { reason: reason.into(), source: Some(source) }
    }
}

/// Errors from the message-type registry.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("a handler is already bound for message code {code:#04x}")]
    AlreadyBound { code: u8 },
}

/// Errors from message and sprite codecs.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("malformed {what}: {details}")]
    Malformed { what: &'static str, details: String },

    #[error("payload of {size} bytes exceeds the {max}-byte unsliced message ceiling")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{field} value {value} outside valid range {min}..={max}")]
    OutOfRange { field: &'static str, value: i64, min: i64, max: i64 },

    #[error("decompression produced {actual} bytes, expected {expected}")]
    BadDecompression { expected: usize, actual: usize },
}

impl CodecError {
    /// Helper constructor for malformed-payload errors.
    pub fn malformed(what: &'static str, details: impl Into<String>) -> Self {
        CodecError::Malformed { what, details: details.into() }
    }

    /// Helper constructor for out-of-range field values.
    pub fn out_of_range(field: &'static str, value: i64, min: i64, max: i64) -> Self {
        CodecError::OutOfRange { field, value, min, max }
    }

    /// Helper constructor for size-mismatched decompression results.
    pub fn bad_decompression(expected: usize, actual: usize) -> Self {
        CodecError::BadDecompression { expected, actual }
    }
}

/// Errors from the script loader.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LoaderError {
    #[error("peripheral rejected a chunk of '{name}': {response}")]
    ChunkRejected { name: String, response: String },

    #[error(transparent)]
    Link(#[from] LinkError),
}
