//! End-to-end training pipeline
//!
//! Loads both speaker directories, shuffles and splits them, trains the
//! network, reports test accuracy and saves the result.

use std::path::PathBuf;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::{Result, SpeakerError};
use crate::features::MfccExtractor;
use crate::model::{SpeakerModel, SpeakerNet};
use crate::train::{evaluate, Evaluation, History, Trainer};

/// Outcome of one training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub history: History,
    pub test: Evaluation,
    pub train_size: usize,
    pub test_size: usize,
    pub model_path: PathBuf,
}

/// Train a model from the directories in `config` and save it to `config.model_path`
///
/// # Errors
/// * `EmptyDataset` - If either split ends up without samples
pub fn train_from_config(config: &PipelineConfig) -> Result<(SpeakerModel, TrainingReport)> {
    config.validate()?;

    let mut rng = match config.dataset.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let extractor = MfccExtractor::new(config.features.clone())?;
    let mut dataset = Dataset::build(
        &config.dataset.target_dir,
        &config.dataset.others_dir,
        &extractor,
    )?;
    dataset.shuffle(&mut rng);

    let (train, test) = dataset.split(config.dataset.train_split);
    if train.is_empty() || test.is_empty() {
        return Err(SpeakerError::EmptyDataset {
            reason: format!(
                "split of {} recordings left {} for training and {} for testing",
                train.len() + test.len(),
                train.len(),
                test.len()
            ),
        });
    }
    info!(
        "Training on {} recordings, testing on {}",
        train.len(),
        test.len()
    );

    let mut network = SpeakerNet::new(
        config.architecture.clone(),
        config.features.feature_shape(),
        &mut rng,
    )?;
    info!("Network has {} parameters", network.num_parameters());

    let mut trainer = Trainer::new(config.training.clone())?;
    let history = trainer.fit(
        &mut network,
        train.samples(),
        Some(test.samples()),
        &mut rng,
    )?;
    let test_eval = evaluate(&network, test.samples())?;

    let model = SpeakerModel::new(config.features.clone(), network)?;
    model.save(&config.model_path)?;

    let report = TrainingReport {
        history,
        test: test_eval,
        train_size: train.len(),
        test_size: test.len(),
        model_path: config.model_path.clone(),
    };
    Ok((model, report))
}
