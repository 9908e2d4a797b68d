//! Dataset Module
//!
//! Builds the labeled training set from two directories of recordings,
//! one for the target speaker and one for everyone else.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Result, SpeakerError};
use crate::features::{FeatureMatrix, MfccExtractor};

const AUDIO_EXTENSION: &str = "wav";

/// Binary class of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Someone other than the target speaker (0)
    Other,
    /// The target speaker (1)
    Target,
}

impl Label {
    pub fn as_f32(self) -> f32 {
        match self {
            Label::Other => 0.0,
            Label::Target => 1.0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Other => write!(f, "other"),
            Label::Target => write!(f, "target"),
        }
    }
}

/// Where the recordings live and how to split them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub target_dir: PathBuf,
    pub others_dir: PathBuf,
    /// Fraction of samples used for training; the rest is the test set
    pub train_split: f64,
    /// Seed for shuffling and weight init; fresh entropy when unset
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("data/target"),
            others_dir: PathBuf::from("data/others"),
            train_split: 0.8,
            seed: None,
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.train_split > 0.0 && self.train_split < 1.0) {
            return Err(SpeakerError::InvalidConfig {
                reason: format!("train_split must be in (0, 1), got {}", self.train_split),
            });
        }
        Ok(())
    }
}

/// One labeled feature matrix
#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    pub features: FeatureMatrix,
    pub label: Label,
}

/// Ordered collection of labeled samples
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
}

/// List the WAV files directly inside `dir`, sorted by file name
///
/// Symlinks are followed. Subdirectories are not descended into. Other
/// files are skipped with a warning.
///
/// # Errors
/// * `DirectoryNotFound` - If `dir` is not a directory
/// * `Io` - If an entry cannot be read, including dangling symlinks
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SpeakerError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        let is_audio = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
            .unwrap_or(false);
        if is_audio {
            files.push(path);
        } else {
            warn!("Skipping non-WAV file {}", path.display());
        }
    }

    Ok(files)
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Extract features for every recording: target files first, then others
    pub fn build(target_dir: &Path, others_dir: &Path, extractor: &MfccExtractor) -> Result<Self> {
        let mut dataset = Self::new();
        dataset.load_dir(target_dir, Label::Target, extractor)?;
        dataset.load_dir(others_dir, Label::Other, extractor)?;

        let (targets, others) = dataset.label_counts();
        info!(
            "Built dataset: {} target and {} other recordings",
            targets, others
        );
        if dataset.is_empty() {
            return Err(SpeakerError::EmptyDataset {
                reason: format!(
                    "no WAV files in {} or {}",
                    target_dir.display(),
                    others_dir.display()
                ),
            });
        }
        if targets == 0 || others == 0 {
            warn!("Dataset only contains one class; the classifier cannot learn to discriminate");
        }
        Ok(dataset)
    }

    fn load_dir(&mut self, dir: &Path, label: Label, extractor: &MfccExtractor) -> Result<()> {
        for path in list_audio_files(dir)? {
            debug!("Extracting features from {} ({})", path.display(), label);
            let features = extractor.extract_file(&path)?;
            self.push(Sample {
                path,
                features,
                label,
            });
        }
        Ok(())
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of (target, other) samples
    pub fn label_counts(&self) -> (usize, usize) {
        let targets = self
            .samples
            .iter()
            .filter(|s| s.label == Label::Target)
            .count();
        (targets, self.samples.len() - targets)
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.samples.shuffle(rng);
    }

    /// Split into (train, test); train holds the first `floor(ratio * len)` samples
    pub fn split(mut self, ratio: f64) -> (Dataset, Dataset) {
        let at = ((ratio * self.samples.len() as f64) as usize).min(self.samples.len());
        let test = self.samples.split_off(at);
        (self, Dataset::from_samples(test))
    }
}
