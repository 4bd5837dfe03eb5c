//! Collaborator contracts for capture hardware.
//!
//! Two collaborators sit behind these traits: the reader itself
//! ([`CaptureDevice`]) and the vendor component that accumulates extracted
//! features into an enrollment template ([`TemplateBuilder`]).
//!
//! `CaptureDevice` uses native `async fn` methods (Rust 1.90 + Edition 2024
//! RPITIT), so it is not object-safe; use generics or the enum wrapper in
//! [`devices`](crate::devices). `TemplateBuilder` is synchronous and is used
//! as `Box<dyn TemplateBuilder>`.

#![allow(async_fn_in_trait)]

use crate::error::{BuilderError, Result};
use crate::types::{BuilderStatus, CaptureEvent, DeviceInfo, FeatureSet};

/// Fingerprint reader driven by the device executor.
///
/// Implementations are owned by exactly one executor thread and are never
/// shared; they only need to be `Send` so they can be moved onto that thread.
/// The futures they return are polled on a single-threaded runtime and need
/// not be `Send`.
///
/// # Examples
///
/// ```no_run
/// use scanbridge_hardware::traits::CaptureDevice;
/// use scanbridge_hardware::types::CaptureEvent;
/// use scanbridge_hardware::Result;
///
/// async fn wait_for_touch<D: CaptureDevice>(device: &mut D) -> Result<()> {
///     device.start_capture().await?;
///     while device.next_event().await? != CaptureEvent::FingerTouch {}
///     device.stop_capture().await
/// }
/// ```
pub trait CaptureDevice: Send {
    /// Begin delivering capture events for an enrollment.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is missing or refuses to start.
    async fn start_capture(&mut self) -> Result<()>;

    /// Stop capturing. Called exactly once for every successful start.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to stop; the reader is considered
    /// released regardless.
    async fn stop_capture(&mut self) -> Result<()>;

    /// Wait for the next event from the reader.
    ///
    /// Must be cancel-safe: dropping the returned future before completion
    /// must not lose an event. The executor races this against submitted
    /// work and session timers.
    ///
    /// # Errors
    ///
    /// Returns an error if the event source is gone.
    async fn next_event(&mut self) -> Result<CaptureEvent>;

    /// Get device information.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader cannot be queried.
    async fn device_info(&self) -> Result<DeviceInfo>;
}

/// Accumulates extracted features into an enrollment template.
pub trait TemplateBuilder: Send {
    /// Number of samples a complete template needs.
    fn required_samples(&self) -> u32;

    /// Feed one feature set.
    ///
    /// # Errors
    ///
    /// [`BuilderError::Rejected`] discards only this feature set.
    /// [`BuilderError::Fatal`] means the builder cannot continue.
    fn add_features(&mut self, features: &FeatureSet) -> std::result::Result<(), BuilderError>;

    /// Samples still needed before the builder is ready.
    fn features_needed(&self) -> u32;

    fn status(&self) -> BuilderStatus;

    /// Discard everything collected and return to `Pending`.
    fn clear(&mut self);

    /// Serialise the finished template.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder is not ready or serialisation fails.
    fn serialize(&self) -> Result<Vec<u8>>;
}
