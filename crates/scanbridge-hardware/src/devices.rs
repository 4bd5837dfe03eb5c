//! Enum wrapper for capture device dispatch.
//!
//! `CaptureDevice` uses native `async fn` in traits, which is not
//! object-safe, so `Box<dyn CaptureDevice>` is not available. The executor
//! and registry hold an [`AnyCaptureDevice`] instead and dispatch on the
//! variant at compile time.
//!
//! # Examples
//!
//! ```
//! use scanbridge_hardware::devices::AnyCaptureDevice;
//! use scanbridge_hardware::mock::MockCaptureDevice;
//! use scanbridge_hardware::traits::CaptureDevice;
//!
//! #[tokio::main]
//! async fn main() -> scanbridge_hardware::Result<()> {
//!     let (reader, _handle) = MockCaptureDevice::new();
//!     let reader = AnyCaptureDevice::Mock(reader);
//!
//!     let info = reader.device_info().await?;
//!     println!("Reader: {}", info.name);
//!     Ok(())
//! }
//! ```

use crate::Result;
use crate::mock::MockCaptureDevice;
use crate::traits::CaptureDevice;
use crate::types::{CaptureEvent, DeviceInfo};

/// Enum wrapper for capture device dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCaptureDevice {
    /// Mock reader for development and testing.
    Mock(MockCaptureDevice),
}

impl From<MockCaptureDevice> for AnyCaptureDevice {
    fn from(device: MockCaptureDevice) -> Self {
        Self::Mock(device)
    }
}

impl CaptureDevice for AnyCaptureDevice {
    async fn start_capture(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.start_capture().await,
        }
    }

    async fn stop_capture(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.stop_capture().await,
        }
    }

    async fn next_event(&mut self) -> Result<CaptureEvent> {
        match self {
            Self::Mock(device) => device.next_event().await,
        }
    }

    async fn device_info(&self) -> Result<DeviceInfo> {
        match self {
            Self::Mock(device) => device.device_info().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_any_device_dispatches_to_mock() {
        let (reader, handle) = MockCaptureDevice::new();
        let mut reader = AnyCaptureDevice::from(reader);

        reader.start_capture().await.unwrap();
        handle.touch().await.unwrap();
        assert_eq!(reader.next_event().await.unwrap(), CaptureEvent::FingerTouch);
        reader.stop_capture().await.unwrap();

        assert_eq!(handle.start_count(), 1);
        assert_eq!(handle.stop_count(), 1);
    }
}
