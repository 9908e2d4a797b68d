//! Error handling for speaker-verify
//!
//! Every error carries a stable code and a list of recovery suggestions so
//! the CLI can tell the user what to try next.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for speaker-verify operations
pub type Result<T> = std::result::Result<T, SpeakerError>;

/// Main error type for speaker-verify operations
#[derive(Error, Debug)]
pub enum SpeakerError {
    // File Errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Failed to write file: {path}: {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Audio Errors
    #[error("Invalid audio file {path}: {reason}")]
    InvalidAudio {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<hound::Error>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples: {path}")]
    EmptyAudio { path: PathBuf },

    #[error("Waveform contains no samples")]
    EmptyWaveform,

    // Dataset Errors
    #[error("Dataset is empty: {reason}")]
    EmptyDataset { reason: String },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    // Model Errors
    #[error("Model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("Model file is corrupted: {reason}")]
    ModelCorrupted { reason: String },

    #[error("Unsupported model format version {found} (expected {expected})")]
    ModelVersion { found: u32, expected: u32 },

    #[error("Training failed: {reason}")]
    TrainingError { reason: String },

    // Numeric Errors
    #[error("Linear system is singular at pivot {pivot}")]
    SingularMatrix { pivot: usize },

    #[error("Not enough samples to fit degree {degree}: got {samples}")]
    InsufficientSamples { degree: usize, samples: usize },

    // Config Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpeakerError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SpeakerError::FileNotFound { .. } => "FILE_NOT_FOUND",
            SpeakerError::DirectoryNotFound { .. } => "DIRECTORY_NOT_FOUND",
            SpeakerError::FileWriteError { .. } => "FILE_WRITE_ERROR",
            SpeakerError::InvalidAudio { .. } => "INVALID_AUDIO",
            SpeakerError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            SpeakerError::EmptyAudio { .. } => "EMPTY_AUDIO",
            SpeakerError::EmptyWaveform => "EMPTY_WAVEFORM",
            SpeakerError::EmptyDataset { .. } => "EMPTY_DATASET",
            SpeakerError::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            SpeakerError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            SpeakerError::ModelCorrupted { .. } => "MODEL_CORRUPTED",
            SpeakerError::ModelVersion { .. } => "MODEL_VERSION",
            SpeakerError::TrainingError { .. } => "TRAINING_ERROR",
            SpeakerError::SingularMatrix { .. } => "SINGULAR_MATRIX",
            SpeakerError::InsufficientSamples { .. } => "INSUFFICIENT_SAMPLES",
            SpeakerError::InvalidConfig { .. } => "INVALID_CONFIG",
            SpeakerError::Io(_) => "IO_ERROR",
            SpeakerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SpeakerError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            SpeakerError::DirectoryNotFound { .. } => vec![
                "Create data/target with recordings of the target speaker",
                "Create data/others with recordings of other speakers",
                "Point --target-dir / --others-dir at existing directories",
            ],
            SpeakerError::InvalidAudio { .. } => vec![
                "Try converting the file to 16-bit PCM WAV first",
                "The file may be corrupted - try re-exporting from source",
            ],
            SpeakerError::UnsupportedFormat { .. } => vec![
                "Convert to WAV (8/16/24/32-bit integer or 32-bit float)",
            ],
            SpeakerError::EmptyAudio { .. } => vec!["Remove silent or zero-length recordings"],
            SpeakerError::EmptyDataset { .. } => vec![
                "Add more recordings so both the train and test splits are non-empty",
                "Adjust train_split in the configuration",
            ],
            SpeakerError::ModelNotFound { .. } => vec![
                "Run 'speaker-verify train' first to produce a model",
                "Pass --model with the path of an existing model file",
            ],
            SpeakerError::ModelCorrupted { .. } | SpeakerError::ModelVersion { .. } => vec![
                "Retrain the model with 'speaker-verify train'",
            ],
            SpeakerError::SingularMatrix { .. } => vec![
                "Lower --degree",
                "Use a longer, non-constant recording",
            ],
            SpeakerError::InsufficientSamples { .. } => vec![
                "Lower --degree or use a longer recording",
            ],
            SpeakerError::InvalidConfig { .. } => vec![
                "Check the configuration file against the defaults",
                "Remove the offending key to fall back to its default",
            ],
            _ => vec![],
        }
    }
}
