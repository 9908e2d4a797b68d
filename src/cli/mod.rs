//! CLI Module
//!
//! Command-line interface for training and running the speaker verifier.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Speaker Verify - train a voice classifier and check recordings against it
#[derive(Parser, Debug)]
#[command(name = "speaker-verify")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train on data/target and data/others, then check the example recording
    #[command(name = "train")]
    Train {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory of recordings of the target speaker
        #[arg(long)]
        target_dir: Option<PathBuf>,

        /// Directory of recordings of other speakers
        #[arg(long)]
        others_dir: Option<PathBuf>,

        /// Where to save the trained model
        #[arg(short, long)]
        model: Option<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Seed for shuffling and weight initialization
        #[arg(long)]
        seed: Option<u64>,

        /// Recording to verify once training finishes
        #[arg(long)]
        example: Option<PathBuf>,
    },

    /// Check whether a recording belongs to the target speaker
    #[command(name = "verify")]
    Verify {
        /// WAV file to check
        file: PathBuf,

        /// Trained model file
        #[arg(short, long, default_value = crate::model::DEFAULT_MODEL_PATH)]
        model: PathBuf,

        /// Decision threshold on the target probability
        #[arg(short, long, default_value_t = crate::verify::DEFAULT_THRESHOLD)]
        threshold: f32,
    },

    /// Fit a polynomial to a recording and write it as Circom circuit input
    #[command(name = "circom-input")]
    CircomInput {
        /// WAV file to fit
        file: PathBuf,

        /// Polynomial degree
        #[arg(short, long, default_value_t = crate::polyfit::DEFAULT_DEGREE)]
        degree: usize,

        /// Point at which the fitted polynomial is evaluated
        #[arg(long, default_value_t = crate::polyfit::DEFAULT_EVAL_X, allow_negative_numbers = true)]
        x: f64,

        /// Output JSON file
        #[arg(short, long, default_value = crate::polyfit::DEFAULT_OUTPUT_PATH)]
        out: PathBuf,
    },

    /// Print the MFCC matrix extracted from a recording
    #[command(name = "features")]
    Features {
        /// WAV file to analyze
        file: PathBuf,

        /// Print the full matrix as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Overrides for [`crate::PipelineConfig`] taken from `train` flags
#[derive(Debug, Clone, Default)]
pub struct TrainOverrides {
    pub target_dir: Option<PathBuf>,
    pub others_dir: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub seed: Option<u64>,
    pub example: Option<PathBuf>,
}

impl TrainOverrides {
    pub fn apply(self, config: &mut crate::PipelineConfig) {
        if let Some(dir) = self.target_dir {
            config.dataset.target_dir = dir;
        }
        if let Some(dir) = self.others_dir {
            config.dataset.others_dir = dir;
        }
        if let Some(path) = self.model {
            config.model_path = path;
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if self.seed.is_some() {
            config.dataset.seed = self.seed;
        }
        if let Some(path) = self.example {
            config.example_file = path;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineConfig;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train_flags() {
        let cli = Cli::parse_from([
            "speaker-verify",
            "train",
            "--epochs",
            "3",
            "--seed",
            "7",
            "--target-dir",
            "me",
        ]);
        match cli.command {
            Commands::Train {
                epochs,
                seed,
                target_dir,
                batch_size,
                ..
            } => {
                assert_eq!(epochs, Some(3));
                assert_eq!(seed, Some(7));
                assert_eq!(target_dir, Some(PathBuf::from("me")));
                assert_eq!(batch_size, None);
            }
            other => panic!("Expected train command, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_verify_defaults() {
        let cli = Cli::parse_from(["speaker-verify", "-v", "verify", "example.wav"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Verify {
                file,
                model,
                threshold,
            } => {
                assert_eq!(file, PathBuf::from("example.wav"));
                assert_eq!(model, PathBuf::from("speaker_verification_model.json"));
                assert_eq!(threshold, 0.5);
            }
            other => panic!("Expected verify command, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_circom_input() {
        let cli = Cli::parse_from(["speaker-verify", "circom-input", "sample.wav", "--x", "-2.5"]);
        match cli.command {
            Commands::CircomInput { file, degree, x, out } => {
                assert_eq!(file, PathBuf::from("sample.wav"));
                assert_eq!(degree, 5);
                assert_eq!(x, -2.5);
                assert_eq!(out, PathBuf::from("circom_input.json"));
            }
            other => panic!("Expected circom-input command, got: {:?}", other),
        }
    }

    #[test]
    fn test_overrides_apply_only_given_fields() {
        let mut config = PipelineConfig::default();
        TrainOverrides {
            epochs: Some(2),
            model: Some(PathBuf::from("out/model.json")),
            ..TrainOverrides::default()
        }
        .apply(&mut config);

        assert_eq!(config.training.epochs, 2);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.model_path, PathBuf::from("out/model.json"));
        assert_eq!(config.dataset.target_dir, PathBuf::from("data/target"));
        assert_eq!(config.dataset.seed, None);
    }
}
