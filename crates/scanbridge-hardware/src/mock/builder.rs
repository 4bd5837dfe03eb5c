//! Mock template builder.
//!
//! Collects feature sets until `required` have been accepted. A feature set
//! whose first byte is [`INCONSISTENT_MARKER`] puts the builder into the
//! `Failed` state, the way a vendor builder reacts to samples that do not
//! belong to the same finger.

use crate::error::{BuilderError, HardwareError, Result};
use crate::mock::device::INCONSISTENT_MARKER;
use crate::traits::TemplateBuilder;
use crate::types::{BuilderStatus, FeatureSet};

/// Header of templates produced by the mock builder.
pub const MOCK_TEMPLATE_MAGIC: &[u8; 8] = b"MOCKTPL1";

#[derive(Debug, Clone)]
pub struct MockTemplateBuilder {
    required: u32,
    features: Vec<FeatureSet>,
    status: BuilderStatus,
    fail_serialize: bool,
}

impl MockTemplateBuilder {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            features: Vec::new(),
            status: if required == 0 {
                BuilderStatus::Ready
            } else {
                BuilderStatus::Pending
            },
            fail_serialize: false,
        }
    }

    /// Make `serialize` fail even when the builder is ready.
    #[must_use]
    pub fn with_failing_serialize(mut self) -> Self {
        self.fail_serialize = true;
        self
    }
}

impl TemplateBuilder for MockTemplateBuilder {
    fn required_samples(&self) -> u32 {
        self.required
    }

    fn add_features(&mut self, features: &FeatureSet) -> std::result::Result<(), BuilderError> {
        if self.status != BuilderStatus::Pending {
            return Err(BuilderError::Fatal(format!(
                "builder is {:?}, not accepting features",
                self.status
            )));
        }
        let Some(first) = features.data.first() else {
            return Err(BuilderError::Rejected("empty feature set".to_string()));
        };
        if *first == INCONSISTENT_MARKER {
            self.status = BuilderStatus::Failed;
            return Ok(());
        }

        self.features.push(features.clone());
        if self.features.len() as u32 >= self.required {
            self.status = BuilderStatus::Ready;
        }
        Ok(())
    }

    fn features_needed(&self) -> u32 {
        self.required.saturating_sub(self.features.len() as u32)
    }

    fn status(&self) -> BuilderStatus {
        self.status
    }

    fn clear(&mut self) {
        self.features.clear();
        self.status = if self.required == 0 {
            BuilderStatus::Ready
        } else {
            BuilderStatus::Pending
        };
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        if self.status != BuilderStatus::Ready {
            return Err(HardwareError::builder("template not ready"));
        }
        if self.fail_serialize {
            return Err(HardwareError::builder("simulated serialization failure"));
        }

        let mut out = MOCK_TEMPLATE_MAGIC.to_vec();
        out.push(self.features.len() as u8);
        for features in &self.features {
            out.extend_from_slice(&features.data);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(byte: u8) -> FeatureSet {
        FeatureSet {
            data: vec![byte, 1, 2],
            quality: 90,
        }
    }

    #[test]
    fn test_builder_becomes_ready() {
        let mut builder = MockTemplateBuilder::new(4);
        for i in 0..3 {
            builder.add_features(&features(i)).unwrap();
            assert_eq!(builder.status(), BuilderStatus::Pending);
        }
        assert_eq!(builder.features_needed(), 1);

        builder.add_features(&features(3)).unwrap();
        assert_eq!(builder.status(), BuilderStatus::Ready);
        assert_eq!(builder.features_needed(), 0);

        let template = builder.serialize().unwrap();
        assert!(template.starts_with(MOCK_TEMPLATE_MAGIC));
        assert_eq!(template[8], 4);
    }

    #[test]
    fn test_builder_inconsistent_sample_fails() {
        let mut builder = MockTemplateBuilder::new(4);
        builder.add_features(&features(1)).unwrap();
        builder.add_features(&features(INCONSISTENT_MARKER)).unwrap();
        assert_eq!(builder.status(), BuilderStatus::Failed);

        assert!(matches!(
            builder.add_features(&features(2)),
            Err(BuilderError::Fatal(_))
        ));

        builder.clear();
        assert_eq!(builder.status(), BuilderStatus::Pending);
        assert_eq!(builder.features_needed(), 4);
    }

    #[test]
    fn test_builder_rejects_empty_features() {
        let mut builder = MockTemplateBuilder::new(2);
        let empty = FeatureSet {
            data: Vec::new(),
            quality: 90,
        };
        assert!(matches!(
            builder.add_features(&empty),
            Err(BuilderError::Rejected(_))
        ));
        assert_eq!(builder.features_needed(), 2);
    }

    #[test]
    fn test_serialize_before_ready_fails() {
        let builder = MockTemplateBuilder::new(2);
        assert!(builder.serialize().is_err());

        let mut failing = MockTemplateBuilder::new(1).with_failing_serialize();
        failing.add_features(&features(1)).unwrap();
        assert!(failing.serialize().is_err());
    }
}
