//! Training Module
//!
//! Mini-batch training, evaluation and per-epoch history.

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::Sample;
use crate::error::{Result, SpeakerError};
use crate::model::loss::{bce_with_logits, is_correct, sigmoid};
use crate::model::{Adam, AdamConfig, SpeakerNet};

/// Training loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: AdamConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 16,
            optimizer: AdamConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(SpeakerError::InvalidConfig {
                reason: format!(
                    "epochs ({}) and batch_size ({}) must be positive",
                    self.epochs, self.batch_size
                ),
            });
        }
        if !(self.optimizer.learning_rate > 0.0) {
            return Err(SpeakerError::InvalidConfig {
                reason: format!(
                    "learning_rate must be positive, got {}",
                    self.optimizer.learning_rate
                ),
            });
        }
        Ok(())
    }
}

/// Loss and accuracy over a set of samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Per-epoch training record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// Mean loss and thresholded accuracy of `model` on `samples`
///
/// # Errors
/// * `EmptyDataset` - If there is nothing to evaluate
pub fn evaluate(model: &SpeakerNet, samples: &[Sample]) -> Result<Evaluation> {
    if samples.is_empty() {
        return Err(SpeakerError::EmptyDataset {
            reason: "evaluation set has no samples".into(),
        });
    }

    let mut total_loss = 0.0f64;
    let mut correct = 0usize;
    for sample in samples {
        let label = sample.label.as_f32();
        let logit = model.logit(&sample.features)?;
        total_loss += bce_with_logits(logit, label) as f64;
        if is_correct(sigmoid(logit), label) {
            correct += 1;
        }
    }

    Ok(Evaluation {
        loss: (total_loss / samples.len() as f64) as f32,
        accuracy: correct as f32 / samples.len() as f32,
    })
}

/// Runs the optimizer over the training set for a number of epochs
pub struct Trainer {
    config: TrainingConfig,
    optimizer: Adam,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let optimizer = Adam::new(config.optimizer.clone());
        Ok(Self { config, optimizer })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` in place.
    ///
    /// The training order is reshuffled every epoch. Gradients are averaged
    /// over each mini-batch; the last batch may be smaller. Reported training
    /// loss and accuracy are means over the epoch, measured before each
    /// batch's update.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        model: &mut SpeakerNet,
        train: &[Sample],
        validation: Option<&[Sample]>,
        rng: &mut R,
    ) -> Result<History> {
        if train.is_empty() {
            return Err(SpeakerError::EmptyDataset {
                reason: "training set has no samples".into(),
            });
        }

        let mut history = History::default();
        let mut order: Vec<usize> = (0..train.len()).collect();
        let epochs = self.config.epochs;

        for epoch in 1..=epochs {
            order.shuffle(rng);

            let mut epoch_loss = 0.0f64;
            let mut correct = 0usize;

            for (batch_index, batch) in order.chunks(self.config.batch_size).enumerate() {
                model.zero_grad();
                let mut batch_loss = 0.0f32;

                for &i in batch {
                    let sample = &train[i];
                    let label = sample.label.as_f32();
                    let outcome = model.accumulate_gradients(&sample.features, label)?;
                    batch_loss += outcome.loss;
                    if is_correct(outcome.probability, label) {
                        correct += 1;
                    }
                }

                self.optimizer
                    .step(model.params_mut(), 1.0 / batch.len() as f32)?;

                debug!(
                    "epoch {} batch {}: loss {:.4}",
                    epoch,
                    batch_index + 1,
                    batch_loss / batch.len() as f32
                );
                epoch_loss += batch_loss as f64;
            }

            let loss = (epoch_loss / train.len() as f64) as f32;
            if !loss.is_finite() {
                return Err(SpeakerError::TrainingError {
                    reason: format!("loss diverged at epoch {}", epoch),
                });
            }
            let accuracy = correct as f32 / train.len() as f32;

            let val = match validation {
                Some(samples) if !samples.is_empty() => Some(evaluate(model, samples)?),
                _ => None,
            };

            match val {
                Some(v) => info!(
                    "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                    epoch, epochs, loss, accuracy, v.loss, v.accuracy
                ),
                None => info!(
                    "Epoch {}/{} - loss: {:.4} - accuracy: {:.4}",
                    epoch, epochs, loss, accuracy
                ),
            }

            history.epochs.push(EpochMetrics {
                epoch,
                loss,
                accuracy,
                val_loss: val.map(|v| v.loss),
                val_accuracy: val.map(|v| v.accuracy),
            });
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Label;
    use crate::model::ArchitectureConfig;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn arch() -> ArchitectureConfig {
        ArchitectureConfig {
            conv1_filters: 4,
            conv2_filters: 4,
            kernel_size: 3,
            pool_size: 2,
            hidden_units: 8,
        }
    }

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let label = if i % 2 == 0 { Label::Target } else { Label::Other };
                let level = if label == Label::Target { 0.6 } else { -0.6 };
                Sample {
                    path: PathBuf::from(format!("{}.wav", i)),
                    features: Array2::from_shape_fn((16, 3), |(t, c)| {
                        level + 0.05 * ((i + t * 5 + c) as f32).cos()
                    }),
                    label,
                }
            })
            .collect()
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut model = SpeakerNet::new(arch(), (16, 3), &mut rng).unwrap();
        let data = samples(10);
        let (train, test) = data.split_at(8);

        let mut trainer = Trainer::new(TrainingConfig {
            epochs: 5,
            batch_size: 3,
            optimizer: AdamConfig::default(),
        })
        .unwrap();
        let history = trainer.fit(&mut model, train, Some(test), &mut rng).unwrap();

        assert_eq!(history.len(), 5);
        for (i, m) in history.epochs.iter().enumerate() {
            assert_eq!(m.epoch, i + 1);
            assert!(m.loss.is_finite());
            assert!((0.0..=1.0).contains(&m.accuracy));
            assert!(m.val_loss.is_some());
        }
    }

    #[test]
    fn test_training_separates_classes() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = SpeakerNet::new(arch(), (16, 3), &mut rng).unwrap();
        let data = samples(12);

        let before = evaluate(&model, &data).unwrap();
        let mut trainer = Trainer::new(TrainingConfig {
            epochs: 60,
            batch_size: 4,
            optimizer: AdamConfig {
                learning_rate: 0.01,
                ..AdamConfig::default()
            },
        })
        .unwrap();
        let history = trainer.fit(&mut model, &data, None, &mut rng).unwrap();
        let after = evaluate(&model, &data).unwrap();

        assert!(after.loss < before.loss);
        assert_eq!(after.accuracy, 1.0);
        assert!(history.last().unwrap().val_loss.is_none());
    }

    #[test]
    fn test_evaluate_empty_set() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = SpeakerNet::new(arch(), (16, 3), &mut rng).unwrap();
        let err = evaluate(&model, &[]).unwrap_err();
        assert_eq!(err.error_code(), "EMPTY_DATASET");
    }

    #[test]
    fn test_fit_rejects_empty_training_set() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = SpeakerNet::new(arch(), (16, 3), &mut rng).unwrap();
        let mut trainer = Trainer::new(TrainingConfig::default()).unwrap();
        let err = trainer.fit(&mut model, &[], None, &mut rng).unwrap_err();
        assert_eq!(err.error_code(), "EMPTY_DATASET");
    }

    #[test]
    fn test_invalid_training_config() {
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(Trainer::new(config).is_err());
    }
}
