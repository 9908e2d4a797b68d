//! The speaker classifier network
//!
//! Conv1d → MaxPool → Conv1d → MaxPool → Flatten → Dense → Dense(1).
//! The last layer is linear and emits a logit; `predict_proba` applies the
//! sigmoid, and training folds it into the loss.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeakerError};
use crate::model::layers::{Activation, Conv1d, Dense, Flatten, Layer, MaxPool1d, Param};
use crate::model::loss::{bce_grad, bce_with_logits, sigmoid};

/// Layer sizes of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    pub conv1_filters: usize,
    pub conv2_filters: usize,
    pub kernel_size: usize,
    pub pool_size: usize,
    pub hidden_units: usize,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            conv1_filters: 64,
            conv2_filters: 128,
            kernel_size: 3,
            pool_size: 2,
            hidden_units: 128,
        }
    }
}

impl ArchitectureConfig {
    /// Rows left after the convolution/pooling stack for `input_len` frames
    pub fn pooled_len(&self, input_len: usize) -> usize {
        let conv = |len: usize| (len + 1).saturating_sub(self.kernel_size);
        let pool = |len: usize| len / self.pool_size.max(1);
        pool(conv(pool(conv(input_len))))
    }

    /// Width of the flattened activation fed to the hidden dense layer
    pub fn flattened_len(&self, input_len: usize) -> usize {
        self.pooled_len(input_len) * self.conv2_filters
    }

    pub fn validate(&self, input_shape: (usize, usize)) -> Result<()> {
        if self.conv1_filters == 0
            || self.conv2_filters == 0
            || self.kernel_size == 0
            || self.pool_size == 0
            || self.hidden_units == 0
        {
            return Err(SpeakerError::InvalidConfig {
                reason: format!("architecture sizes must all be positive: {:?}", self),
            });
        }
        if input_shape.1 == 0 || self.pooled_len(input_shape.0) == 0 {
            return Err(SpeakerError::InvalidConfig {
                reason: format!(
                    "input of {} frames x {} coefficients is too small for kernel {} and pool {}",
                    input_shape.0, input_shape.1, self.kernel_size, self.pool_size
                ),
            });
        }
        Ok(())
    }
}

/// Result of a single training forward/backward pass
#[derive(Debug, Clone, Copy)]
pub struct SampleOutcome {
    pub loss: f32,
    pub probability: f32,
}

/// Binary speaker classifier over `[frames, coefficients]` feature matrices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerNet {
    input_shape: (usize, usize),
    architecture: ArchitectureConfig,
    layers: Vec<Layer>,
}

impl SpeakerNet {
    /// Build a freshly initialized network for inputs of `input_shape`
    pub fn new<R: Rng + ?Sized>(
        architecture: ArchitectureConfig,
        input_shape: (usize, usize),
        rng: &mut R,
    ) -> Result<Self> {
        architecture.validate(input_shape)?;
        let a = &architecture;

        let layers = vec![
            Layer::Conv1d(Conv1d::new(
                rng,
                input_shape.1,
                a.conv1_filters,
                a.kernel_size,
                Activation::Relu,
            )),
            Layer::MaxPool1d(MaxPool1d::new(a.pool_size)),
            Layer::Conv1d(Conv1d::new(
                rng,
                a.conv1_filters,
                a.conv2_filters,
                a.kernel_size,
                Activation::Relu,
            )),
            Layer::MaxPool1d(MaxPool1d::new(a.pool_size)),
            Layer::Flatten(Flatten::new()),
            Layer::Dense(Dense::new(
                rng,
                a.flattened_len(input_shape.0),
                a.hidden_units,
                Activation::Relu,
            )),
            Layer::Dense(Dense::new(rng, a.hidden_units, 1, Activation::Linear)),
        ];

        Ok(Self {
            input_shape,
            architecture,
            layers,
        })
    }

    /// Check that the layers are exactly those `architecture` and
    /// `input_shape` describe
    ///
    /// Deserialized networks must pass this before use; a layer whose
    /// weights disagree with its neighbours would otherwise fail inside
    /// the matrix products.
    ///
    /// # Errors
    /// * `InvalidConfig` - If the stored architecture itself is invalid
    /// * `ShapeMismatch` - If a layer kind, hyperparameter or weight shape differs
    pub fn validate_structure(&self) -> Result<()> {
        let reference = Self::new(
            self.architecture.clone(),
            self.input_shape,
            &mut StdRng::seed_from_u64(0),
        )?;

        if self.layers.len() != reference.layers.len() {
            return Err(SpeakerError::ShapeMismatch {
                expected: vec![reference.layers.len()],
                actual: vec![self.layers.len()],
            });
        }
        for (layer, expected) in self.layers.iter().zip(&reference.layers) {
            if layer.name() != expected.name() || layer.signature() != expected.signature() {
                return Err(SpeakerError::ShapeMismatch {
                    expected: expected.signature(),
                    actual: layer.signature(),
                });
            }
        }
        Ok(())
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    pub fn architecture(&self) -> &ArchitectureConfig {
        &self.architecture
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(Layer::num_parameters).sum()
    }

    fn check_input(&self, x: &Array2<f32>) -> Result<()> {
        if x.dim() != self.input_shape {
            return Err(SpeakerError::ShapeMismatch {
                expected: vec![self.input_shape.0, self.input_shape.1],
                actual: vec![x.nrows(), x.ncols()],
            });
        }
        Ok(())
    }

    fn logit_from(output: &Array2<f32>) -> Result<f32> {
        output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| SpeakerError::ShapeMismatch {
                expected: vec![1, 1],
                actual: vec![output.nrows(), output.ncols()],
            })
    }

    /// Raw output before the sigmoid
    pub fn logit(&self, x: &Array2<f32>) -> Result<f32> {
        self.check_input(x)?;
        let mut activation = x.clone();
        for layer in &self.layers {
            activation = layer.forward(&activation)?;
        }
        Self::logit_from(&activation)
    }

    /// Probability that `x` belongs to the target speaker
    pub fn predict_proba(&self, x: &Array2<f32>) -> Result<f32> {
        self.logit(x).map(sigmoid)
    }

    /// Forward and backward pass for one sample; gradients are added to
    /// whatever the parameters already hold.
    pub fn accumulate_gradients(&mut self, x: &Array2<f32>, label: f32) -> Result<SampleOutcome> {
        self.check_input(x)?;

        let mut activation = x.clone();
        for layer in self.layers.iter_mut() {
            activation = layer.forward_train(&activation)?;
        }
        let logit = Self::logit_from(&activation)?;

        let mut grad = Array2::from_elem((1, 1), bce_grad(logit, label));
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }

        Ok(SampleOutcome {
            loss: bce_with_logits(logit, label),
            probability: sigmoid(logit),
        })
    }

    /// Trainable parameters in a stable order
    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.params_mut())
            .collect()
    }

    pub fn zero_grad(&mut self) {
        for param in self.params_mut() {
            param.zero_grad();
        }
    }
}
