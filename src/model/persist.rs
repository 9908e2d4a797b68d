//! Model persistence
//!
//! A trained model is written as one JSON document holding the feature
//! configuration, the network and a SHA-256 checksum over both. Loading
//! rejects files whose checksum or format version does not match.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, SpeakerError};
use crate::features::MfccConfig;
use crate::model::network::SpeakerNet;

/// Current on-disk format version
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Default location of the saved model
pub const DEFAULT_MODEL_PATH: &str = "speaker_verification_model.json";

/// Identity of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ModelMetadata {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

/// A network together with the feature configuration it was trained on
#[derive(Debug, Clone)]
pub struct SpeakerModel {
    pub metadata: ModelMetadata,
    pub features: MfccConfig,
    pub network: SpeakerNet,
}

#[derive(Serialize)]
struct ModelFileRef<'a> {
    format_version: u32,
    metadata: &'a ModelMetadata,
    checksum: String,
    features: &'a MfccConfig,
    network: &'a SpeakerNet,
}

#[derive(Deserialize)]
struct ModelFile {
    format_version: u32,
    metadata: ModelMetadata,
    checksum: String,
    features: MfccConfig,
    network: SpeakerNet,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    features: &'a MfccConfig,
    network: &'a SpeakerNet,
}

fn checksum(features: &MfccConfig, network: &SpeakerNet) -> Result<String> {
    let bytes = serde_json::to_vec(&ChecksumInput { features, network })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

impl SpeakerModel {
    /// Pair a network with its feature configuration
    ///
    /// # Errors
    /// * `ShapeMismatch` - If the network input does not match the feature shape
    pub fn new(features: MfccConfig, network: SpeakerNet) -> Result<Self> {
        let (frames, coeffs) = features.feature_shape();
        if network.input_shape() != (frames, coeffs) {
            return Err(SpeakerError::ShapeMismatch {
                expected: vec![frames, coeffs],
                actual: vec![network.input_shape().0, network.input_shape().1],
            });
        }
        Ok(Self {
            metadata: ModelMetadata::fresh(),
            features,
            network,
        })
    }

    /// Probability that a feature matrix belongs to the target speaker
    pub fn predict_proba(&self, features: &Array2<f32>) -> Result<f32> {
        self.network.predict_proba(features)
    }

    /// Write the model to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SpeakerError::FileWriteError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = ModelFileRef {
            format_version: MODEL_FORMAT_VERSION,
            metadata: &self.metadata,
            checksum: checksum(&self.features, &self.network)?,
            features: &self.features,
            network: &self.network,
        };
        let content = serde_json::to_string(&file)?;

        fs::write(path, content).map_err(|e| SpeakerError::FileWriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            "Saved model {} ({} parameters) to {}",
            self.metadata.id,
            self.network.num_parameters(),
            path.display()
        );
        Ok(())
    }

    /// Read and verify a model written by [`SpeakerModel::save`]
    ///
    /// # Errors
    /// * `ModelNotFound` - If nothing exists at `path`
    /// * `ModelVersion` - If the file was written by another format version
    /// * `ModelCorrupted` - If the file does not parse or its checksum fails
    /// * `ShapeMismatch` - If the stored layers disagree with the stored architecture
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SpeakerError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path)?;
        let corrupted = |e: serde_json::Error| SpeakerError::ModelCorrupted {
            reason: e.to_string(),
        };

        let probe: VersionProbe = serde_json::from_str(&content).map_err(corrupted)?;
        if probe.format_version != MODEL_FORMAT_VERSION {
            return Err(SpeakerError::ModelVersion {
                found: probe.format_version,
                expected: MODEL_FORMAT_VERSION,
            });
        }

        let file: ModelFile = serde_json::from_str(&content).map_err(corrupted)?;
        debug!("Loaded model format v{}", file.format_version);

        let actual = checksum(&file.features, &file.network)?;
        if actual != file.checksum {
            return Err(SpeakerError::ModelCorrupted {
                reason: format!("checksum mismatch: stored {}, computed {}", file.checksum, actual),
            });
        }

        file.network.validate_structure()?;

        let mut model = Self::new(file.features, file.network)?;
        model.metadata = file.metadata;
        Ok(model)
    }
}
