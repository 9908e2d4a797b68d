//! Single-recording verification

use std::fmt;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeakerError};
use crate::features::MfccExtractor;
use crate::model::SpeakerModel;

/// Default decision threshold on the target probability
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Decision for one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Target,
    Other,
}

impl Verdict {
    /// Target only when the probability is strictly above the threshold
    pub fn from_probability(probability: f32, threshold: f32) -> Self {
        if probability > threshold {
            Verdict::Target
        } else {
            Verdict::Other
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Verdict::Target => "This is your voice.",
            Verdict::Other => "This is not your voice.",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Probability and decision for one recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub probability: f32,
    pub verdict: Verdict,
}

/// Reject thresholds outside the open interval (0, 1)
pub fn validate_threshold(threshold: f32) -> Result<()> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(SpeakerError::InvalidConfig {
            reason: format!("threshold must be in (0, 1), got {}", threshold),
        })
    }
}

/// Score a WAV file with `model`, using the feature settings stored in it
///
/// # Errors
/// * `InvalidConfig` - If `threshold` is not in (0, 1)
pub fn verify_file(model: &SpeakerModel, path: &Path, threshold: f32) -> Result<Verification> {
    validate_threshold(threshold)?;
    let extractor = MfccExtractor::new(model.features.clone())?;
    let features = extractor.extract_file(path)?;
    let probability = model.predict_proba(&features)?;
    let verdict = Verdict::from_probability(probability, threshold);

    info!(
        "Verified {}: p(target) = {:.4} -> {:?}",
        path.display(),
        probability,
        verdict
    );

    Ok(Verification {
        probability,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{generate_tone, write_waveform};
    use crate::features::MfccConfig;
    use crate::model::{ArchitectureConfig, SpeakerNet};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;
    use test_case::test_case;

    #[test_case(0.9, Verdict::Target ; "confident target")]
    #[test_case(0.5, Verdict::Other ; "threshold itself is rejected")]
    #[test_case(0.1, Verdict::Other ; "confident other")]
    fn test_verdict_threshold(probability: f32, expected: Verdict) {
        assert_eq!(Verdict::from_probability(probability, DEFAULT_THRESHOLD), expected);
    }

    #[test]
    fn test_verdict_messages() {
        assert_eq!(Verdict::Target.to_string(), "This is your voice.");
        assert_eq!(Verdict::Other.to_string(), "This is not your voice.");
    }

    #[test]
    fn test_verify_file_uses_model_feature_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("example.wav");
        write_waveform(&path, &generate_tone(220.0, 0.5, 16000), 16000).unwrap();

        let features = MfccConfig {
            max_len: 20,
            ..MfccConfig::default()
        };
        let arch = ArchitectureConfig {
            conv1_filters: 2,
            conv2_filters: 2,
            kernel_size: 3,
            pool_size: 2,
            hidden_units: 4,
        };
        let mut rng = StdRng::seed_from_u64(2);
        let net = SpeakerNet::new(arch, features.feature_shape(), &mut rng).unwrap();
        let model = SpeakerModel::new(features, net).unwrap();

        let result = verify_file(&model, &path, DEFAULT_THRESHOLD).unwrap();
        assert!((0.0..=1.0).contains(&result.probability));
        assert_eq!(
            result.verdict,
            Verdict::from_probability(result.probability, DEFAULT_THRESHOLD)
        );
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(1.0 ; "one")]
    #[test_case(1.5 ; "above one")]
    #[test_case(f32::NAN ; "not a number")]
    fn test_out_of_range_threshold_rejected(threshold: f32) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("example.wav");
        write_waveform(&path, &generate_tone(220.0, 0.5, 16000), 16000).unwrap();

        let features = MfccConfig {
            max_len: 20,
            ..MfccConfig::default()
        };
        let arch = ArchitectureConfig {
            conv1_filters: 2,
            conv2_filters: 2,
            hidden_units: 2,
            ..ArchitectureConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let net = SpeakerNet::new(arch, features.feature_shape(), &mut rng).unwrap();
        let model = SpeakerModel::new(features, net).unwrap();

        let err = verify_file(&model, &path, threshold).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_verify_missing_file() {
        let features = MfccConfig::default();
        let mut rng = StdRng::seed_from_u64(2);
        let net = SpeakerNet::new(
            ArchitectureConfig {
                conv1_filters: 2,
                conv2_filters: 2,
                hidden_units: 2,
                ..ArchitectureConfig::default()
            },
            features.feature_shape(),
            &mut rng,
        )
        .unwrap();
        let model = SpeakerModel::new(features, net).unwrap();

        let err = verify_file(&model, Path::new("/nonexistent/example.wav"), 0.5).unwrap_err();
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
    }
}
