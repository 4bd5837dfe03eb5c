//! Enrollment sessions for the scanbridge bridge.
//!
//! This crate turns the device executor into something many concurrent
//! callers can use: the [`SessionRegistry`] creates capture sessions, hands
//! out the latest [`ProgressSnapshot`](scanbridge_core::ProgressSnapshot) of
//! each one, consumes finished templates exactly once and evicts sessions
//! that nobody polls any more. The [`DeviceBroker`] makes sure only one
//! session drives the reader at a time.

pub mod broker;
pub mod config;
pub mod registry;
pub mod session;
pub mod state_machine;

pub use broker::{DeviceBroker, DeviceToken};
pub use config::{SessionConfig, UnknownSessionPolicy};
pub use registry::{BuilderFactory, SessionRegistry};
pub use session::{CaptureSession, SessionControl};
pub use state_machine::{EnrollmentStateMachine, PhaseTransition};
