//! Capture hardware abstraction for the scanbridge enrollment bridge.
//!
//! This crate defines what the enrollment core needs from the outside world
//! and the thread that talks to it:
//!
//! - [`CaptureDevice`]: a fingerprint reader with a start/stop control pair
//!   and an ordered stream of [`CaptureEvent`]s.
//! - [`TemplateBuilder`]: the vendor component that turns extracted features
//!   into an enrollment template.
//! - [`DeviceExecutor`]: the single thread that owns the reader, runs
//!   submitted work against it and drains its events while idle.
//!
//! # Design Philosophy
//!
//! - **Async-first**: device operations use native `async fn` in traits
//!   (Rust 1.90 + Edition 2024 RPITIT).
//! - **Single owner**: the reader is moved into the executor thread and only
//!   ever touched there, so drivers need not be `Sync`.
//! - **Enum dispatch**: [`AnyCaptureDevice`] stands in for a trait object.
//!
//! # Mock Implementations
//!
//! [`mock::MockCaptureDevice`] and [`mock::MockTemplateBuilder`] simulate the
//! reader and the builder for development and testing without hardware.
//!
//! [`CaptureDevice`]: traits::CaptureDevice
//! [`TemplateBuilder`]: traits::TemplateBuilder
//! [`DeviceExecutor`]: executor::DeviceExecutor
//! [`AnyCaptureDevice`]: devices::AnyCaptureDevice

pub mod devices;
pub mod error;
pub mod executor;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::AnyCaptureDevice;
pub use error::{BuilderError, HardwareError, Result};
pub use traits::{CaptureDevice, TemplateBuilder};
pub use types::{BuilderStatus, CaptureEvent, CaptureFeedback, DeviceInfo, FeatureSet, Sample};

// Re-export executor types
pub use executor::{
    DeviceExecutor, DeviceTask, ExecutorConfig, ExecutorHandle, ExecutorStats, FnTask, JobHandle,
    QueryDeviceInfo,
};
