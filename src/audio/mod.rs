//! Audio Module
//!
//! Waveform loading for the feature front-end:
//! - WAV decoding to 32-bit float
//! - Down-mixing to mono
//! - Resampling to the analysis rate
//! - Synthetic signals for tests and benchmarks

pub mod io;

pub use io::{generate_tone, generate_voice_like, load_mono, load_waveform, write_waveform};

/// Analysis sample rate for all feature extraction (16kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;
