//! Speaker Verify - Single-Speaker Voice Verification
//!
//! Trains a small convolutional classifier that tells whether a recording
//! was spoken by one particular person.
//!
//! # Pipeline
//!
//! - Audio: WAV files are decoded, downmixed to mono and resampled to 16 kHz
//! - Features: 13 MFCCs per frame, padded or truncated to 160 frames
//! - Model: Conv1D / MaxPool / Dense network with a sigmoid output
//! - Training: Adam on binary cross-entropy over an 80/20 split
//! - Verification: a recording is the target speaker when p > 0.5
//!
//! [`polyfit`] separately fits a polynomial to a recording and exports it
//! as input for a Circom circuit.

pub mod audio;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod polyfit;
pub mod train;
pub mod verify;

pub use config::PipelineConfig;
pub use error::{Result, SpeakerError};
pub use model::SpeakerModel;
pub use verify::{verify_file, Verdict, Verification};
