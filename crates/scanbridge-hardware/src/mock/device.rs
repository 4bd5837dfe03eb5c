//! Mock fingerprint reader for testing and development.
//!
//! The reader's event stream is fed from a [`MockCaptureHandle`], so a test
//! (or the demo binary) plays the part of the user in front of the scanner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::{
    HardwareError, Result,
    traits::CaptureDevice,
    types::{CaptureEvent, CaptureFeedback, DeviceInfo, Sample},
};

const DEFAULT_SERIAL: &str = "MOCK-0001";

/// First byte of a sample the mock builder treats as inconsistent with the
/// samples collected before it.
pub const INCONSISTENT_MARKER: u8 = 0xFF;

/// Mock fingerprint reader.
///
/// # Examples
///
/// ```
/// use scanbridge_hardware::mock::MockCaptureDevice;
/// use scanbridge_hardware::traits::CaptureDevice;
/// use scanbridge_hardware::types::CaptureEvent;
///
/// #[tokio::main]
/// async fn main() -> scanbridge_hardware::Result<()> {
///     let (mut reader, handle) = MockCaptureDevice::new();
///
///     reader.start_capture().await?;
///     handle.touch().await?;
///     assert_eq!(reader.next_event().await?, CaptureEvent::FingerTouch);
///     reader.stop_capture().await?;
///
///     assert_eq!(handle.start_count(), 1);
///     assert_eq!(handle.stop_count(), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockCaptureDevice {
    /// Channel receiver for scripted events
    event_rx: mpsc::Receiver<MockEvent>,

    /// Device name
    name: String,

    state: Arc<MockState>,
}

impl MockCaptureDevice {
    /// Create a new mock reader with the default name.
    ///
    /// Returns the reader and a handle that scripts its events.
    pub fn new() -> (Self, MockCaptureHandle) {
        Self::with_name("Mock Fingerprint Reader".to_string())
    }

    /// Create a new mock reader with a custom name.
    pub fn with_name(name: String) -> (Self, MockCaptureHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let state = Arc::new(MockState::default());

        let device = Self {
            event_rx,
            name,
            state: Arc::clone(&state),
        };

        let handle = MockCaptureHandle {
            event_tx,
            state,
            sequence: Arc::new(AtomicU8::new(0)),
        };

        (device, handle)
    }
}

impl CaptureDevice for MockCaptureDevice {
    async fn start_capture(&mut self) -> Result<()> {
        if self.state.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(HardwareError::capture_start("simulated driver refusal"));
        }
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        self.state.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_capture(&mut self) -> Result<()> {
        let delay = self.state.stop_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.state.capturing.store(false, Ordering::SeqCst);
        if self.state.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(HardwareError::capture_stop("simulated driver fault on stop"));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<CaptureEvent> {
        let event = self
            .event_rx
            .recv()
            .await
            .ok_or_else(|| HardwareError::disconnected("Capture event channel closed"))?;

        match event {
            MockEvent::Event(event) => Ok(event),
            MockEvent::Fail(message) => Err(HardwareError::other(message)),
            MockEvent::Panic(message) => panic!("{message}"),
        }
    }

    async fn device_info(&self) -> Result<DeviceInfo> {
        Ok(DeviceInfo::new(self.name.clone(), "Mock Fingerprint Reader v1.0")
            .with_serial_number(DEFAULT_SERIAL)
            .with_firmware_version("1.0.0"))
    }
}

/// Internal event type for the mock reader.
#[derive(Debug)]
enum MockEvent {
    Event(CaptureEvent),
    Fail(String),
    Panic(String),
}

#[derive(Debug, Default)]
struct MockState {
    starts: AtomicUsize,
    stops: AtomicUsize,
    capturing: AtomicBool,
    fail_next_start: AtomicBool,
    fail_next_stop: AtomicBool,
    stop_delay_ms: AtomicU64,
}

/// Handle for scripting a mock reader.
///
/// Cloneable; every clone feeds the same reader.
#[derive(Debug, Clone)]
pub struct MockCaptureHandle {
    event_tx: mpsc::Sender<MockEvent>,
    state: Arc<MockState>,
    sequence: Arc<AtomicU8>,
}

impl MockCaptureHandle {
    async fn push(&self, event: MockEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| HardwareError::disconnected("Capture event channel closed"))
    }

    /// Queue an arbitrary capture event.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn send(&self, event: CaptureEvent) -> Result<()> {
        self.push(MockEvent::Event(event)).await
    }

    /// Simulate a finger being placed on the reader.
    pub async fn touch(&self) -> Result<()> {
        self.send(CaptureEvent::FingerTouch).await
    }

    /// Simulate the finger being lifted.
    pub async fn lift(&self) -> Result<()> {
        self.send(CaptureEvent::FingerGone).await
    }

    /// Queue a good sample with the given quality score.
    ///
    /// Each sample carries distinct bytes so templates built from them are
    /// distinguishable.
    pub async fn good_sample(&self, quality: u8) -> Result<()> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let sample = Sample::new(vec![0x10, seq, quality], quality, CaptureFeedback::Good);
        self.send(CaptureEvent::SampleCaptured(sample)).await
    }

    /// Queue a sample the reader classified as poor.
    pub async fn poor_sample(&self, quality: u8, feedback: CaptureFeedback) -> Result<()> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let sample = Sample::new(vec![0x20, seq, quality], quality, feedback);
        self.send(CaptureEvent::SampleCaptured(sample)).await
    }

    /// Queue a good-quality sample that does not match the previous ones.
    pub async fn inconsistent_sample(&self, quality: u8) -> Result<()> {
        let sample = Sample::new(vec![INCONSISTENT_MARKER, quality], quality, CaptureFeedback::Good);
        self.send(CaptureEvent::SampleCaptured(sample)).await
    }

    /// Queue a quality report without a sample.
    pub async fn quality_feedback(&self, feedback: CaptureFeedback) -> Result<()> {
        self.send(CaptureEvent::SampleQuality(feedback)).await
    }

    /// Simulate the reader being plugged in.
    pub async fn connect(&self) -> Result<()> {
        self.send(CaptureEvent::ReaderConnected {
            serial: DEFAULT_SERIAL.to_string(),
        })
        .await
    }

    /// Simulate the reader being unplugged.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(CaptureEvent::ReaderDisconnected {
            serial: DEFAULT_SERIAL.to_string(),
        })
        .await
    }

    /// Make the next `next_event` call return a driver error.
    pub async fn fail_next_event(&self, message: impl Into<String>) -> Result<()> {
        self.push(MockEvent::Fail(message.into())).await
    }

    /// Make the next `next_event` call panic.
    pub async fn panic_next_event(&self, message: impl Into<String>) -> Result<()> {
        self.push(MockEvent::Panic(message.into())).await
    }

    /// Make the next `start_capture` call fail.
    pub fn fail_next_start(&self) {
        self.state.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Make the next `stop_capture` call report an error. The reader still
    /// counts as stopped.
    pub fn fail_next_stop(&self) {
        self.state.fail_next_stop.store(true, Ordering::SeqCst);
    }

    /// Make every `stop_capture` call take `delay` before returning.
    pub fn delay_stop(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.stop_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of successful `start_capture` calls.
    pub fn start_count(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop_capture` calls.
    pub fn stop_count(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Whether the reader is between a start and a stop.
    pub fn is_capturing(&self) -> bool {
        self.state.capturing.load(Ordering::SeqCst)
    }
}
