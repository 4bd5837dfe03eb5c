//! Mock collaborators for testing and development.
//!
//! These simulate a fingerprint reader and a vendor template builder so the
//! whole enrollment flow can run without physical hardware.

pub mod builder;
pub mod device;

// Re-export commonly used types
pub use builder::{MOCK_TEMPLATE_MAGIC, MockTemplateBuilder};
pub use device::{INCONSISTENT_MARKER, MockCaptureDevice, MockCaptureHandle};
