//! Classifier Module
//!
//! The 1-D convolutional speaker classifier:
//! - Layers with forward/backward passes
//! - Binary cross-entropy loss and the Adam optimizer
//! - Model persistence with integrity checks

pub mod layers;
pub mod loss;
pub mod network;
pub mod optimizer;
pub mod persist;

pub use layers::{Activation, Layer, Param};
pub use network::{ArchitectureConfig, SampleOutcome, SpeakerNet};
pub use optimizer::{Adam, AdamConfig};
pub use persist::{ModelMetadata, SpeakerModel, DEFAULT_MODEL_PATH, MODEL_FORMAT_VERSION};
