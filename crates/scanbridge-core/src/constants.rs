//! Shared constants for enrollment sessions.
//!
//! This module centralises the numeric bounds, default timings and
//! caller-facing instruction texts used across the bridge. Keeping them in one
//! place means the session state machine, the registry and any transport layer
//! on top of them agree on the same vocabulary.
//!
//! # Usage
//!
//! ```
//! use scanbridge_core::constants::*;
//! use std::time::Duration;
//!
//! fn threshold_in_range(value: i32) -> bool {
//!     (MIN_QUALITY_THRESHOLD..=MAX_QUALITY_THRESHOLD).contains(&value)
//! }
//!
//! assert!(threshold_in_range(DEFAULT_QUALITY_THRESHOLD));
//! let window = Duration::from_millis(DEFAULT_INACTIVITY_WINDOW_MS);
//! assert_eq!(window.as_secs(), 30);
//! ```

// ============================================================================
// Request Parameters
// ============================================================================

/// Lowest accepted quality threshold.
///
/// A threshold of zero accepts every sample the reader classifies as good.
pub const MIN_QUALITY_THRESHOLD: i32 = 0;

/// Highest accepted quality threshold.
///
/// Sample quality scores range from 0 (unusable) to 100 (perfect).
pub const MAX_QUALITY_THRESHOLD: i32 = 100;

/// Quality threshold used when the caller does not supply one.
///
/// # Value: 60
pub const DEFAULT_QUALITY_THRESHOLD: i32 = 60;

/// Finger requested when the caller does not name one.
pub const DEFAULT_FINGER_TYPE: &str = "index";

// ============================================================================
// Progress
// ============================================================================

/// Samples a template builder needs by default.
///
/// Matches the four-touch enrollment of common optical readers.
pub const DEFAULT_REQUIRED_SAMPLES: u32 = 4;

/// Percent reported only by a completed session holding a template.
pub const PERCENT_DONE: u8 = 100;

/// Highest percent a session may report before it reaches `done`.
///
/// The progress formula can reach 100 as soon as the last sample is accepted,
/// but 100 is reserved for a session that actually holds a template.
pub const MAX_IN_PROGRESS_PERCENT: u8 = 99;

// ============================================================================
// Timing Defaults
// ============================================================================

/// Default inactivity window (milliseconds).
///
/// A session with no accepted activity for this long fails with a timeout.
/// Measured from the last activity, not from session start.
///
/// # Value: 30000ms (30 seconds)
pub const DEFAULT_INACTIVITY_WINDOW_MS: u64 = 30_000;

/// Default device executor pump interval (milliseconds).
///
/// Bounds the latency of cancellation and timeout checks while a session
/// waits for device events.
///
/// # Value: 50ms
pub const DEFAULT_PUMP_INTERVAL_MS: u64 = 50;

/// Default grace period past the inactivity window before a stale session
/// is evicted (milliseconds).
///
/// # Value: 5000ms
pub const DEFAULT_EVICTION_GRACE_MS: u64 = 5_000;

/// Default period of the registry eviction sweep (milliseconds).
///
/// # Value: 10000ms
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;

/// Default bounded wait for the device lock in blocking enroll mode
/// (milliseconds).
///
/// # Value: 5000ms
pub const DEFAULT_BROKER_WAIT_MS: u64 = 5_000;

/// Default number of builder resets tolerated before a session fails.
pub const DEFAULT_MAX_BUILDER_RESETS: u32 = 2;

// ============================================================================
// Instruction Texts
// ============================================================================

/// Instruction shown while waiting for the first touch.
pub const INSTRUCTION_PLACE_FINGER: &str = "Place your finger on the scanner...";

/// Instruction shown once a finger is on the reader.
pub const INSTRUCTION_FINGER_DETECTED: &str = "Finger detected on scanner...";

/// Instruction shown after a lift before the template is ready.
pub const INSTRUCTION_PLACE_AGAIN: &str = "Place your finger back on the scanner...";

/// Instruction shown after a sample below the quality bar.
pub const INSTRUCTION_POOR_QUALITY: &str = "Poor quality scan, please try again...";

/// Instruction shown when the builder discarded its samples.
pub const INSTRUCTION_RESTART: &str = "Enrollment failed. Please try again.";

/// Instruction shown while the template is serialised.
pub const INSTRUCTION_PROCESSING: &str = "Processing template...";

/// Instruction shown once the template is available.
pub const INSTRUCTION_DONE: &str = "Enrollment complete";

/// Instruction shown after a failure.
pub const INSTRUCTION_FAILED: &str = "Scan failed. Please try again.";

/// Instruction shown after cancellation.
pub const INSTRUCTION_CANCELLED: &str = "Enrollment cancelled";

/// Instruction reported for an unknown session when polls of unknown ids are
/// answered with a waiting snapshot.
pub const INSTRUCTION_NO_UPDATES: &str = "No updates yet";
