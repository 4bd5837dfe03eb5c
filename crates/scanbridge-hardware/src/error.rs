//! Error types for capture hardware and the device executor.
//!
//! These errors describe what went wrong at the driver level. The session
//! layer converts them into [`scanbridge_core::Error`] before anything reaches
//! a poller.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during capture device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Reader is not connected or has been unplugged.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// The driver refused to start capturing.
    #[error("Failed to start capture: {message}")]
    CaptureStart { message: String },

    /// The driver refused to stop capturing.
    #[error("Failed to stop capture: {message}")]
    CaptureStop { message: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Template builder could not produce a template.
    #[error("Template builder error: {message}")]
    Builder { message: String },

    /// The device executor is not running or has shut down.
    #[error("Device executor unavailable: {message}")]
    ExecutorUnavailable { message: String },

    /// A work unit panicked on the device executor.
    #[error("Work unit panicked: {message}")]
    TaskPanicked { message: String },

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new capture start error.
    pub fn capture_start(message: impl Into<String>) -> Self {
        Self::CaptureStart {
            message: message.into(),
        }
    }

    /// Create a new capture stop error.
    pub fn capture_stop(message: impl Into<String>) -> Self {
        Self::CaptureStop {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new template builder error.
    pub fn builder(message: impl Into<String>) -> Self {
        Self::Builder {
            message: message.into(),
        }
    }

    /// Create a new executor unavailable error.
    pub fn executor_unavailable(message: impl Into<String>) -> Self {
        Self::ExecutorUnavailable {
            message: message.into(),
        }
    }

    /// Create a new panicked work unit error.
    pub fn task_panicked(message: impl Into<String>) -> Self {
        Self::TaskPanicked {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Outcome of feeding one feature set to a template builder.
///
/// `Rejected` is per-sample and recoverable: the builder discarded the
/// features but keeps everything collected so far. `Fatal` means the builder
/// can no longer produce a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuilderError {
    #[error("Features rejected: {0}")]
    Rejected(String),

    #[error("Template builder failed: {0}")]
    Fatal(String),
}

impl From<HardwareError> for scanbridge_core::Error {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Builder { message } => scanbridge_core::Error::EnrollmentFailed(message),
            HardwareError::Timeout { duration_ms } => scanbridge_core::Error::Timeout { duration_ms },
            other => scanbridge_core::Error::DeviceFailure(other.to_string()),
        }
    }
}
