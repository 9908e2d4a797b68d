//! Pipeline configuration
//!
//! Defaults reproduce the classic setup: 16 kHz audio, 13 MFCCs over 160
//! frames, data under `data/target` and `data/others`, 20 epochs of batch
//! 16 and an 80/20 split. A JSON file may override any subset of fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetConfig;
use crate::error::{Result, SpeakerError};
use crate::features::MfccConfig;
use crate::model::{ArchitectureConfig, DEFAULT_MODEL_PATH};
use crate::train::TrainingConfig;
use crate::verify::{validate_threshold, DEFAULT_THRESHOLD};

/// Everything the train-and-verify pipeline needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: MfccConfig,
    pub architecture: ArchitectureConfig,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub model_path: PathBuf,
    /// Recording scored after training
    pub example_file: PathBuf,
    pub threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            features: MfccConfig::default(),
            architecture: ArchitectureConfig::default(),
            dataset: DatasetConfig::default(),
            training: TrainingConfig::default(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            example_file: PathBuf::from("example.wav"),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SpeakerError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig =
            serde_json::from_str(&content).map_err(|e| SpeakerError::InvalidConfig {
                reason: format!("{}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.architecture.validate(self.features.feature_shape())?;
        self.dataset.validate()?;
        self.training.validate()?;
        validate_threshold(self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.features.sample_rate, 16000);
        assert_eq!(config.features.feature_shape(), (160, 13));
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.dataset.train_split, 0.8);
        assert_eq!(config.dataset.target_dir, PathBuf::from("data/target"));
        assert_eq!(config.dataset.others_dir, PathBuf::from("data/others"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "training": { "epochs": 3 }, "dataset": { "seed": 42 } }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.dataset.seed, Some(42));
        assert_eq!(config.features, MfccConfig::default());
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "training": { "epochs": 0 } }"#).unwrap();
        assert_eq!(
            PipelineConfig::load(&path).unwrap_err().error_code(),
            "INVALID_CONFIG"
        );

        fs::write(&path, r#"{ "features": { "max_len": 4 } }"#).unwrap();
        assert_eq!(
            PipelineConfig::load(&path).unwrap_err().error_code(),
            "INVALID_CONFIG"
        );

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(
            PipelineConfig::load(&path).unwrap_err().error_code(),
            "INVALID_CONFIG"
        );
    }

    #[test]
    fn test_missing_config_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
    }
}
