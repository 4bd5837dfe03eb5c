use thiserror::Error;

use crate::snapshot::Phase;
use crate::types::SessionId;

#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("Invalid finger type: {0}")]
    InvalidFingerType(String),

    #[error("Quality threshold must be {min}-{max}, got {value}")]
    InvalidQualityThreshold { value: i32, min: i32, max: i32 },

    // Device errors
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Device failure: {0}")]
    DeviceFailure(String),

    // Enrollment outcome errors
    #[error("Enrollment failed: {0}")]
    EnrollmentFailed(String),

    #[error("Enrollment timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Enrollment cancelled")]
    Cancelled,

    // Registry errors
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Template for session {0} was already consumed")]
    AlreadyConsumed(SessionId),

    #[error("Session {session_id} is not complete (phase: {phase})")]
    NotReady { session_id: SessionId, phase: Phase },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` for errors caused by bad caller input, raised before
    /// any device interaction.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidFingerType(_) | Error::InvalidQualityThreshold { .. }
        )
    }

    /// Returns `true` when the device lock could not be granted.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::DeviceBusy(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
