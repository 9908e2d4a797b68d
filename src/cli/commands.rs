//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::cli::TrainOverrides;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::features::{MfccConfig, MfccExtractor};
use crate::model::SpeakerModel;
use crate::pipeline::train_from_config;
use crate::polyfit::CircuitInput;
use crate::verify::{validate_threshold, verify_file};

/// Train a model and, when the example recording exists, verify it.
pub fn train(config_path: Option<&Path>, overrides: TrainOverrides) -> Result<()> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration: {}", path.display());
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config);

    let (model, report) = train_from_config(&config)?;

    println!("Test Accuracy: {:.2}%", report.test.accuracy * 100.0);
    println!("Model saved: {}", report.model_path.display());

    if config.example_file.exists() {
        let result = verify_file(&model, &config.example_file, config.threshold)?;
        println!("{}", result.verdict);
    } else {
        warn!(
            "Example recording {} not found; skipping verification",
            config.example_file.display()
        );
    }

    Ok(())
}

/// Verify a single recording against a saved model.
pub fn verify(file: &Path, model_path: &Path, threshold: f32) -> Result<()> {
    validate_threshold(threshold)?;

    info!("Loading model: {}", model_path.display());
    let model = SpeakerModel::load(model_path)?;

    let result = verify_file(&model, file, threshold)?;
    println!("{}", result.verdict);
    println!("Target probability: {:.4}", result.probability);

    Ok(())
}

/// Fit a polynomial to a recording and save it as circuit input.
pub fn circom_input(file: &Path, degree: usize, x: f64, out: &Path) -> Result<()> {
    let input = CircuitInput::from_file(file, degree, x)?;
    println!("Fitted polynomial coefficients: {:?}", input.coeffs);
    println!("p({}) = {}", input.x, input.y);

    input.save(out)?;
    println!("Circom input saved to {}", out.display());

    Ok(())
}

#[derive(Serialize)]
struct FeatureDump {
    frames: usize,
    coefficients: usize,
    values: Vec<Vec<f32>>,
}

/// Print the MFCC matrix of a recording.
pub fn features(file: &Path, json: bool) -> Result<()> {
    let extractor = MfccExtractor::new(MfccConfig::default())?;
    let matrix = extractor.extract_file(file)?;
    let (frames, coefficients) = matrix.dim();

    if json {
        let dump = FeatureDump {
            frames,
            coefficients,
            values: matrix.outer_iter().map(|row| row.to_vec()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&dump)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Shape: {} frames x {} coefficients", frames, coefficients);
    println!("{:-<40}", "");
    println!("{:>6} {:>12} {:>12}", "coeff", "mean", "std");
    for (i, column) in matrix.columns().into_iter().enumerate() {
        let mean = column.mean().unwrap_or(0.0);
        let std = column.std(0.0);
        println!("{:>6} {:>12.4} {:>12.4}", i, mean, std);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_verify_rejects_threshold_before_loading_model() {
        let err = verify(
            Path::new("example.wav"),
            &PathBuf::from("/nonexistent/model.json"),
            1.5,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
