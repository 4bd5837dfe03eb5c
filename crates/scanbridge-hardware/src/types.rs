//! Common types for capture hardware.

use serde::{Deserialize, Serialize};

use crate::error::{HardwareError, Result};
use scanbridge_core::QualityThreshold;

/// Generic device information.
///
/// Contains metadata about a reader such as name, model, serial number, and
/// firmware version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device name (e.g., "U.are.U 4500", "Mock Fingerprint Reader").
    pub name: String,

    /// Device model identifier.
    pub model: String,

    /// Optional device serial number.
    pub serial_number: Option<String>,

    /// Optional firmware version string.
    pub firmware_version: Option<String>,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with required fields.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            serial_number: None,
            firmware_version: None,
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }
}

/// Reader's classification of a captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFeedback {
    Good,
    LowContrast,
    TooNoisy,
    Partial,
    TooFast,
    TooSlow,
}

impl CaptureFeedback {
    #[must_use]
    pub fn is_good(&self) -> bool {
        matches!(self, CaptureFeedback::Good)
    }

    /// Caller-facing hint for this feedback.
    #[must_use]
    pub fn instruction(&self) -> &'static str {
        match self {
            CaptureFeedback::Good => "Good quality detected",
            CaptureFeedback::LowContrast => "Image too faint, press a little harder...",
            CaptureFeedback::TooNoisy => "Image too noisy, clean the scanner and try again...",
            CaptureFeedback::Partial => "Center your finger on the scanner...",
            CaptureFeedback::TooFast => "Finger moved too fast, hold it still...",
            CaptureFeedback::TooSlow => "Finger moved too slowly, try again...",
        }
    }
}

/// One captured fingerprint image, as delivered by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Raw image or driver-specific sample payload.
    pub data: Vec<u8>,

    /// Quality score (0-100).
    pub quality: u8,

    pub feedback: CaptureFeedback,
}

impl Sample {
    pub fn new(data: Vec<u8>, quality: u8, feedback: CaptureFeedback) -> Self {
        Self {
            data,
            quality,
            feedback,
        }
    }

    /// A sample is fed to the builder only if the reader classified it as
    /// good and its score clears the requested threshold.
    #[must_use]
    pub fn is_acceptable(&self, threshold: QualityThreshold) -> bool {
        self.feedback.is_good() && threshold.accepts(self.quality)
    }
}

/// Features extracted from a sample, ready for a template builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    pub data: Vec<u8>,
    pub quality: u8,
}

impl FeatureSet {
    /// Extract enrollment features from a sample.
    ///
    /// # Errors
    /// Returns an error if the sample carries no data; callers treat this as
    /// a transient per-sample failure.
    pub fn extract(sample: &Sample) -> Result<Self> {
        if sample.data.is_empty() {
            return Err(HardwareError::other("no features found in sample"));
        }
        Ok(Self {
            data: sample.data.clone(),
            quality: sample.quality,
        })
    }
}

/// Event delivered by a capture device, in driver order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaptureEvent {
    /// A finger was placed on the reader.
    FingerTouch,

    /// The finger was lifted.
    FingerGone,

    /// Image quality report preceding or replacing a sample.
    SampleQuality(CaptureFeedback),

    /// A complete sample was captured.
    SampleCaptured(Sample),

    /// Reader plugged in.
    ReaderConnected { serial: String },

    /// Reader unplugged.
    ReaderDisconnected { serial: String },
}

impl CaptureEvent {
    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureEvent::FingerTouch => "finger_touch",
            CaptureEvent::FingerGone => "finger_gone",
            CaptureEvent::SampleQuality(_) => "sample_quality",
            CaptureEvent::SampleCaptured(_) => "sample_captured",
            CaptureEvent::ReaderConnected { .. } => "reader_connected",
            CaptureEvent::ReaderDisconnected { .. } => "reader_disconnected",
        }
    }
}

/// Readiness of a template builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderStatus {
    /// More samples needed.
    Pending,
    /// Enough consistent samples collected; the template can be serialised.
    Ready,
    /// Collected samples are inconsistent; the builder must be cleared.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_device_info_builder() {
        let info = DeviceInfo::new("U.are.U 4500", "Optical USB Reader")
            .with_serial_number("{A1B2}")
            .with_firmware_version("3.1");

        assert_eq!(info.name, "U.are.U 4500");
        assert_eq!(info.model, "Optical USB Reader");
        assert_eq!(info.serial_number, Some("{A1B2}".to_string()));
        assert_eq!(info.firmware_version, Some("3.1".to_string()));
    }

    #[rstest]
    #[case(CaptureFeedback::Good, 80, 60, true)]
    #[case(CaptureFeedback::Good, 60, 60, true)]
    #[case(CaptureFeedback::Good, 59, 60, false)]
    #[case(CaptureFeedback::LowContrast, 95, 60, false)]
    #[case(CaptureFeedback::Partial, 100, 0, false)]
    fn test_sample_acceptance(
        #[case] feedback: CaptureFeedback,
        #[case] quality: u8,
        #[case] threshold: i32,
        #[case] expected: bool,
    ) {
        let sample = Sample::new(vec![1, 2, 3], quality, feedback);
        let threshold = QualityThreshold::new(threshold).unwrap();
        assert_eq!(sample.is_acceptable(threshold), expected);
    }

    #[test]
    fn test_feature_extraction() {
        let sample = Sample::new(vec![7, 8, 9], 90, CaptureFeedback::Good);
        let features = FeatureSet::extract(&sample).unwrap();
        assert_eq!(features.data, vec![7, 8, 9]);
        assert_eq!(features.quality, 90);

        let empty = Sample::new(Vec::new(), 90, CaptureFeedback::Good);
        assert!(FeatureSet::extract(&empty).is_err());
    }

    #[test]
    fn test_feedback_instruction() {
        assert_eq!(CaptureFeedback::Good.instruction(), "Good quality detected");
        assert!(!CaptureFeedback::TooFast.is_good());
    }
}
