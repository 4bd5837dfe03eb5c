//! Enrollment state machine.
//!
//! [`EnrollmentStateMachine`] owns the progress snapshot of one capture
//! session and is the only code that mutates it. Phase changes are validated
//! against [`Phase::can_transition_to`] and recorded in a bounded history;
//! progress, instruction text and the inactivity clock are updated through
//! dedicated methods so the snapshot invariants hold after every call:
//!
//! - `percent_complete == 100` only in `Done`, and `Done` always carries a
//!   template.
//! - Percent never decreases except through [`reset_progress`].
//! - Once terminal, nothing changes.
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use scanbridge_core::{Phase, SessionId};
//! use scanbridge_session::EnrollmentStateMachine;
//!
//! let mut machine = EnrollmentStateMachine::new(SessionId::new());
//! machine.record_sample(25, 3).unwrap();
//! machine.record_sample(100, 0).unwrap();
//! assert_eq!(machine.snapshot().percent_complete, 99);
//!
//! machine.enter_processing().unwrap();
//! machine.complete(Bytes::from_static(b"template")).unwrap();
//! assert_eq!(machine.phase(), Phase::Done);
//! assert_eq!(machine.snapshot().percent_complete, 100);
//! ```
//!
//! [`reset_progress`]: EnrollmentStateMachine::reset_progress

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::time::Instant;

use scanbridge_core::constants::{
    INSTRUCTION_CANCELLED, INSTRUCTION_DONE, INSTRUCTION_FAILED, INSTRUCTION_PROCESSING,
    MAX_IN_PROGRESS_PERCENT, PERCENT_DONE,
};
use scanbridge_core::{Error, FailureKind, Phase, ProgressSnapshot, Result, SessionId};

/// Maximum number of phase transitions kept in history.
///
/// One accepted sample is one transition, so this covers dozens of full
/// enrollments including builder resets.
const MAX_HISTORY_SIZE: usize = 64;

/// A single phase transition with timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: Instant,
}

impl PhaseTransition {
    pub fn new(from: Phase, to: Phase) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    /// Time since this transition occurred.
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// State machine for one enrollment attempt.
///
/// Not thread-safe; it lives inside the capture session on the device thread
/// and publishes clones of its snapshot.
#[derive(Debug, Clone)]
pub struct EnrollmentStateMachine {
    snapshot: ProgressSnapshot,
    history: VecDeque<PhaseTransition>,
    last_activity: Instant,
}

impl EnrollmentStateMachine {
    /// Create a machine in `Waiting` with 0%.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            snapshot: ProgressSnapshot::waiting(session_id),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            last_activity: Instant::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.snapshot.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.snapshot.phase.is_terminal()
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &VecDeque<PhaseTransition> {
        &self.history
    }

    /// Transition to `target` if the move is allowed from the current phase.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the move is not allowed;
    /// the machine is left unchanged.
    pub fn transition_to(&mut self, target: Phase) -> Result<PhaseTransition> {
        let from = self.snapshot.phase;
        if !from.can_transition_to(&target) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: target.to_string(),
            });
        }

        let transition = PhaseTransition::new(from, target);
        self.snapshot.phase = target;
        self.touch();
        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        Ok(transition)
    }

    /// Replace the caller-facing instruction. Ignored once terminal.
    pub fn set_instruction(&mut self, text: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.snapshot.instruction = text.into();
        self.touch();
    }

    /// Reset the inactivity clock.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn inactive_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Record an accepted sample: move to `Scanning` and raise progress.
    ///
    /// Percent is clamped below 100 and never lowered.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` outside `Waiting`/`Scanning`.
    pub fn record_sample(&mut self, percent: u8, scans_remaining: u32) -> Result<PhaseTransition> {
        let transition = self.transition_to(Phase::Scanning)?;
        let percent = percent.min(MAX_IN_PROGRESS_PERCENT);
        self.snapshot.percent_complete = self.snapshot.percent_complete.max(percent);
        self.snapshot.scans_remaining = Some(scans_remaining);
        Ok(transition)
    }

    /// Drop progress back to zero after the builder discarded its samples.
    pub fn reset_progress(&mut self, scans_remaining: u32) {
        if self.is_terminal() {
            return;
        }
        self.snapshot.percent_complete = 0;
        self.snapshot.scans_remaining = Some(scans_remaining);
        self.touch();
    }

    /// Enter `Processing` while the template is serialised.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` unless currently `Scanning`.
    pub fn enter_processing(&mut self) -> Result<PhaseTransition> {
        let transition = self.transition_to(Phase::Processing)?;
        self.snapshot.percent_complete = MAX_IN_PROGRESS_PERCENT;
        self.snapshot.scans_remaining = Some(0);
        self.snapshot.instruction = INSTRUCTION_PROCESSING.to_string();
        Ok(transition)
    }

    /// Finish with a template.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` unless currently `Processing`.
    pub fn complete(&mut self, template: Bytes) -> Result<PhaseTransition> {
        let transition = self.transition_to(Phase::Done)?;
        self.snapshot.percent_complete = PERCENT_DONE;
        self.snapshot.template = Some(template);
        self.snapshot.instruction = INSTRUCTION_DONE.to_string();
        Ok(transition)
    }

    /// Fail the session. Returns `None` if it was already terminal.
    pub fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) -> Option<PhaseTransition> {
        let transition = self.transition_to(Phase::Failed).ok()?;
        self.snapshot.failure = Some(kind);
        self.snapshot.error_detail = Some(detail.into());
        self.snapshot.instruction = INSTRUCTION_FAILED.to_string();
        Some(transition)
    }

    /// Cancel the session. Returns `None` if it was already terminal.
    pub fn cancel(&mut self) -> Option<PhaseTransition> {
        let transition = self.transition_to(Phase::Cancelled).ok()?;
        self.snapshot.cancel_requested = true;
        self.snapshot.instruction = INSTRUCTION_CANCELLED.to_string();
        Some(transition)
    }

    fn touch(&mut self) {
        self.snapshot.updated_at = Utc::now();
    }
}
