//! MFCC feature extraction.
//!
//! Turns a waveform into a fixed-shape `[max_len, n_mfcc]` matrix, the
//! input the classifier expects. Front-end defaults:
//! - SampleRate: 16000
//! - FFTSize: 2048, HopSize: 512, periodic Hann window, centered frames
//! - NumMels: 128 (Slaney scale and normalization), 0 Hz to Nyquist
//! - Log power in dB with an 80 dB dynamic range
//! - Orthonormal DCT-II, first 13 coefficients kept

mod mel;
mod stft;

use std::path::Path;

use log::debug;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::audio::{load_waveform, TARGET_SAMPLE_RATE};
use crate::error::{Result, SpeakerError};

pub use mel::{hz_to_mel, mel_filter_bank, mel_to_hz};
pub use stft::{hann_window, PowerSpectrogram};

/// Fixed-shape feature matrix: rows are frames, columns are coefficients.
pub type FeatureMatrix = Array2<f32>;

/// Floor applied before taking the log of a power value.
const AMIN: f32 = 1e-10;

/// Configuration for MFCC extraction.
///
/// Stored alongside trained models so inference uses exactly the
/// parameters the model was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccConfig {
    pub sample_rate: u32,
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Number of frames every feature matrix is padded or truncated to
    pub max_len: usize,
    pub fmin: f32,
    /// Upper filterbank edge; Nyquist when unset
    pub fmax: Option<f32>,
    /// Dynamic range kept below the loudest bin; unlimited when unset
    pub top_db: Option<f32>,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            n_mfcc: 13,
            n_mels: 128,
            n_fft: 2048,
            hop_length: 512,
            max_len: 160,
            fmin: 0.0,
            fmax: None,
            top_db: Some(80.0),
        }
    }
}

impl MfccConfig {
    /// Shape of the matrices produced with this configuration
    pub fn feature_shape(&self) -> (usize, usize) {
        (self.max_len, self.n_mfcc)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(SpeakerError::InvalidConfig { reason });

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return invalid(format!(
                "n_fft ({}) must be at least 2 and hop_length ({}) positive",
                self.n_fft, self.hop_length
            ));
        }
        if self.n_mels == 0 || self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return invalid(format!(
                "need 0 < n_mfcc ({}) <= n_mels ({})",
                self.n_mfcc, self.n_mels
            ));
        }
        if self.max_len == 0 {
            return invalid("max_len must be positive".into());
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        let fmax = self.fmax.unwrap_or(nyquist);
        if self.fmin < 0.0 || fmax <= self.fmin || fmax > nyquist {
            return invalid(format!(
                "need 0 <= fmin ({}) < fmax ({}) <= {}",
                self.fmin, fmax, nyquist
            ));
        }
        Ok(())
    }
}

/// MFCC feature extractor.
pub struct MfccExtractor {
    config: MfccConfig,
    stft: PowerSpectrogram,
    mel_basis: Array2<f32>,
    dct_basis: Array2<f32>,
}

impl MfccExtractor {
    /// Creates a new extractor, precomputing the filterbank and DCT basis.
    pub fn new(config: MfccConfig) -> Result<Self> {
        config.validate()?;

        let fmax = config.fmax.unwrap_or(config.sample_rate as f32 / 2.0);
        let mel_basis = mel_filter_bank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin as f64,
            fmax as f64,
        );
        let dct_basis = dct_ortho_basis(config.n_mfcc, config.n_mels);
        let stft = PowerSpectrogram::new(config.n_fft, config.hop_length);

        Ok(Self {
            config,
            stft,
            mel_basis,
            dct_basis,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Variable-length MFCCs, shape `[1 + len / hop_length, n_mfcc]`.
    pub fn mfcc(&self, samples: &[f32]) -> Array2<f32> {
        let power = self.stft.compute(samples);
        let mel = power.dot(&self.mel_basis.t());
        let log_mel = power_to_db(&mel, self.config.top_db);
        log_mel.dot(&self.dct_basis.t())
    }

    /// Fixed-shape features for a waveform already at the configured rate.
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureMatrix> {
        if samples.is_empty() {
            return Err(SpeakerError::EmptyWaveform);
        }
        let mfcc = self.mfcc(samples);
        debug!(
            "Extracted {} frames, fixing length to {}",
            mfcc.nrows(),
            self.config.max_len
        );
        Ok(fix_length(&mfcc, self.config.max_len))
    }

    /// Loads a WAV file at the configured rate and extracts its features.
    pub fn extract_file(&self, path: &Path) -> Result<FeatureMatrix> {
        let samples = load_waveform(path, self.config.sample_rate)?;
        if samples.is_empty() {
            return Err(SpeakerError::EmptyAudio {
                path: path.to_path_buf(),
            });
        }
        self.extract(&samples)
    }
}

/// Converts a power matrix to decibels relative to 1.0.
///
/// With `top_db` set, values more than `top_db` below the matrix maximum
/// are raised to that floor.
pub fn power_to_db(power: &Array2<f32>, top_db: Option<f32>) -> Array2<f32> {
    let mut db = power.mapv(|p| 10.0 * p.max(AMIN).log10());
    if let Some(range) = top_db {
        let peak = db.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let floor = peak - range;
        db.mapv_inplace(|v| v.max(floor));
    }
    db
}

/// Orthonormal DCT-II basis, shape `[n_out, n_in]`.
pub fn dct_ortho_basis(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f64;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        let angle = std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n);
        (scale * angle.cos()) as f32
    })
}

/// Truncates or zero-pads the frame axis to exactly `max_len` rows.
pub fn fix_length(features: &Array2<f32>, max_len: usize) -> FeatureMatrix {
    let mut fixed = Array2::<f32>::zeros((max_len, features.ncols()));
    let rows = features.nrows().min(max_len);
    fixed
        .slice_mut(s![..rows, ..])
        .assign(&features.slice(s![..rows, ..]));
    fixed
}
