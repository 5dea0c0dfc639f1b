//! Error types for sensorwire.

use thiserror::Error;

/// Main error type for all sensorwire operations.
#[derive(Debug, Error)]
pub enum SensorwireError {
    /// Malformed call: absent required argument, zero skip rate, bad key.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown channel, property key, version or frame.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Buffer at capacity, empty queue or failed allocation.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Frame skipped by the skip-rate throttle.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Call made in a state that does not allow it.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// No frame arrived before the caller's deadline.
    #[error("Timed out waiting for a frame")]
    Timeout,

    /// MsgPack serialization error (typed property payloads).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON error (configuration only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse cause of a [`SensorwireError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    ResourceExhausted,
    Cancelled,
    InvalidOperation,
    Timeout,
    Codec,
}

impl SensorwireError {
    /// Map the error onto its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::Timeout => ErrorKind::Timeout,
            Self::MsgPackEncode(_) | Self::MsgPackDecode(_) | Self::Json(_) => ErrorKind::Codec,
        }
    }

    /// Whether this is a steady-state admission drop (capacity or skip rate).
    #[inline]
    pub fn is_expected_drop(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_) | Self::Cancelled(_))
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub(crate) fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub(crate) fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }
}

/// Result type alias using SensorwireError.
pub type Result<T> = std::result::Result<T, SensorwireError>;
