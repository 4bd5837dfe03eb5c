use crate::{
    Result,
    constants::{DEFAULT_QUALITY_THRESHOLD, MAX_QUALITY_THRESHOLD, MIN_QUALITY_THRESHOLD},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Finger presented to the reader.
///
/// The set is fixed; parsing is case-insensitive and ignores surrounding
/// whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerType {
    Thumb,
    #[default]
    Index,
    Middle,
    Ring,
    Little,
}

impl FingerType {
    /// All accepted finger types, in anatomical order.
    pub const ALL: [FingerType; 5] = [
        FingerType::Thumb,
        FingerType::Index,
        FingerType::Middle,
        FingerType::Ring,
        FingerType::Little,
    ];

    /// Lowercase name used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerType::Thumb => "thumb",
            FingerType::Index => "index",
            FingerType::Middle => "middle",
            FingerType::Ring => "ring",
            FingerType::Little => "little",
        }
    }
}

impl fmt::Display for FingerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FingerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thumb" => Ok(FingerType::Thumb),
            "index" => Ok(FingerType::Index),
            "middle" => Ok(FingerType::Middle),
            "ring" => Ok(FingerType::Ring),
            "little" | "pinky" => Ok(FingerType::Little),
            _ => Err(Error::InvalidFingerType(s.to_string())),
        }
    }
}

/// Minimum sample quality (0-100) a capture must reach to be fed to the
/// template builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualityThreshold(u8);

impl QualityThreshold {
    /// Create a quality threshold with validation.
    ///
    /// Takes a signed value so that negative caller input is reported
    /// as-is instead of wrapping.
    ///
    /// # Errors
    /// Returns `Error::InvalidQualityThreshold` if the value is outside 0-100.
    pub fn new(value: i32) -> Result<Self> {
        if !(MIN_QUALITY_THRESHOLD..=MAX_QUALITY_THRESHOLD).contains(&value) {
            return Err(Error::InvalidQualityThreshold {
                value,
                min: MIN_QUALITY_THRESHOLD,
                max: MAX_QUALITY_THRESHOLD,
            });
        }
        // Range checked above, always fits in u8.
        Ok(QualityThreshold(value as u8))
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Whether a sample of the given quality clears this threshold.
    #[must_use]
    pub fn accepts(&self, quality: u8) -> bool {
        quality >= self.0
    }
}

impl Default for QualityThreshold {
    fn default() -> Self {
        QualityThreshold(DEFAULT_QUALITY_THRESHOLD as u8)
    }
}

impl fmt::Display for QualityThreshold {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for QualityThreshold {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: i32 = s.trim().parse().map_err(|_| Error::InvalidQualityThreshold {
            value: -1,
            min: MIN_QUALITY_THRESHOLD,
            max: MAX_QUALITY_THRESHOLD,
        })?;
        QualityThreshold::new(value)
    }
}

/// Opaque session identifier.
///
/// Generated ids are UUID v4 strings, unique for the lifetime of the
/// process. Ids received from callers are wrapped verbatim so that lookups of
/// unknown ids can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

/// Validated parameters of an enrollment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub finger: FingerType,
    pub quality_threshold: QualityThreshold,
}

impl EnrollmentRequest {
    #[must_use]
    pub fn new(finger: FingerType, quality_threshold: QualityThreshold) -> Self {
        Self {
            finger,
            quality_threshold,
        }
    }

    /// Validate raw caller input.
    ///
    /// # Errors
    /// Returns `Error::InvalidFingerType` or `Error::InvalidQualityThreshold`.
    /// The finger type is checked first.
    pub fn parse(finger: &str, quality_threshold: i32) -> Result<Self> {
        let finger = finger.parse()?;
        let quality_threshold = QualityThreshold::new(quality_threshold)?;
        Ok(Self::new(finger, quality_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("thumb", FingerType::Thumb)]
    #[case("index", FingerType::Index)]
    #[case("INDEX", FingerType::Index)]
    #[case(" middle ", FingerType::Middle)]
    #[case("ring", FingerType::Ring)]
    #[case("little", FingerType::Little)]
    #[case("pinky", FingerType::Little)]
    fn test_finger_type_valid(#[case] input: &str, #[case] expected: FingerType) {
        let finger: FingerType = input.parse().unwrap();
        assert_eq!(finger, expected);
    }

    #[rstest]
    #[case("")]
    #[case("toe")]
    #[case("index2")]
    fn test_finger_type_invalid(#[case] input: &str) {
        let err = input.parse::<FingerType>().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_finger_type_display_roundtrip() {
        for finger in FingerType::ALL {
            assert_eq!(finger.to_string().parse::<FingerType>().unwrap(), finger);
        }
    }

    #[rstest]
    #[case(0)]
    #[case(60)]
    #[case(100)]
    fn test_quality_threshold_valid(#[case] value: i32) {
        let threshold = QualityThreshold::new(value).unwrap();
        assert_eq!(i32::from(threshold.as_u8()), value);
    }

    #[rstest]
    #[case(-1)]
    #[case(101)]
    #[case(i32::MAX)]
    fn test_quality_threshold_invalid(#[case] value: i32) {
        let err = QualityThreshold::new(value).unwrap_err();
        assert!(matches!(err, Error::InvalidQualityThreshold { value: v, .. } if v == value));
    }

    #[test]
    fn test_quality_threshold_accepts() {
        let threshold = QualityThreshold::new(60).unwrap();
        assert!(threshold.accepts(60));
        assert!(threshold.accepts(95));
        assert!(!threshold.accepts(59));
        assert_eq!(QualityThreshold::default().as_u8(), 60);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_enrollment_request_parse() {
        let request = EnrollmentRequest::parse("index", 60).unwrap();
        assert_eq!(request.finger, FingerType::Index);
        assert_eq!(request.quality_threshold.as_u8(), 60);

        assert!(matches!(
            EnrollmentRequest::parse("toe", 500),
            Err(Error::InvalidFingerType(_))
        ));
        assert!(matches!(
            EnrollmentRequest::parse("ring", 500),
            Err(Error::InvalidQualityThreshold { .. })
        ));
    }
}
