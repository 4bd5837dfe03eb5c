//! Progress snapshot vocabulary.
//!
//! A [`ProgressSnapshot`] is the only thing pollers ever see of a capture
//! session. Snapshots are immutable values: the owning session builds a new
//! one and publishes it whole, so readers never observe a half-updated record.
//!
//! # Phases
//!
//! - `Waiting`: session created, no finger seen yet
//! - `Scanning`: samples are being collected
//! - `Processing`: the builder is ready and the template is being serialised
//! - `Done`: template available (terminal)
//! - `Failed`: timeout, enrollment or device failure (terminal)
//! - `Cancelled`: explicit cancellation (terminal)
//!
//! # Valid Transitions
//!
//! - Waiting → Scanning → Processing → Done
//! - Scanning → Scanning (one per accepted sample)
//! - Waiting/Scanning/Processing → Failed/Cancelled

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{INSTRUCTION_PLACE_FINGER, PERCENT_DONE};
use crate::types::SessionId;

/// Lifecycle phase of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    Scanning,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Waiting => "waiting",
            Phase::Scanning => "scanning",
            Phase::Processing => "processing",
            Phase::Done => "done",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(phase)
    }
}

impl Phase {
    /// Terminal phases never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed | Phase::Cancelled)
    }

    /// Check if a transition to `target` is allowed from this phase.
    ///
    /// # Examples
    ///
    /// ```
    /// use scanbridge_core::Phase;
    ///
    /// assert!(Phase::Waiting.can_transition_to(&Phase::Scanning));
    /// assert!(Phase::Scanning.can_transition_to(&Phase::Scanning));
    /// assert!(!Phase::Waiting.can_transition_to(&Phase::Done));
    /// assert!(!Phase::Done.can_transition_to(&Phase::Cancelled));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: &Phase) -> bool {
        matches!(
            (self, target),
            (Phase::Waiting, Phase::Scanning)
                | (Phase::Scanning, Phase::Scanning | Phase::Processing)
                | (Phase::Processing, Phase::Done)
                | (
                    Phase::Waiting | Phase::Scanning | Phase::Processing,
                    Phase::Failed | Phase::Cancelled
                )
        )
    }
}

/// Cause of a `Failed` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No activity within the inactivity window.
    Timeout,
    /// The template builder gave up on the collected samples.
    Enrollment,
    /// Driver-level failure during start, stop or capture.
    Device,
    /// A panic inside the session's work unit.
    Internal,
}

/// Externally visible, atomically published progress record of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub phase: Phase,
    pub percent_complete: u8,
    pub instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scans_remaining: Option<u32>,
    /// Serialised template; present only when `phase == Done`.
    #[serde(skip)]
    pub template: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

impl ProgressSnapshot {
    /// Initial snapshot of a freshly created session.
    #[must_use]
    pub fn waiting(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            phase: Phase::Waiting,
            percent_complete: 0,
            instruction: INSTRUCTION_PLACE_FINGER.to_string(),
            scans_remaining: None,
            template: None,
            error_detail: None,
            failure: None,
            created_at: now,
            updated_at: now,
            cancel_requested: false,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether the template is ready to be consumed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done && self.template.is_some()
    }
}

/// Percent of required samples collected.
///
/// `min(100, (required - remaining) * 100 / required)`; a builder that needs
/// no samples counts as complete.
#[must_use]
pub fn percent_complete(required: u32, remaining: u32) -> u8 {
    if required == 0 {
        return PERCENT_DONE;
    }
    let collected = u64::from(required.saturating_sub(remaining));
    let percent = collected * 100 / u64::from(required);
    percent.min(u64::from(PERCENT_DONE)) as u8
}
