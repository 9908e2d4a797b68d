//! Adam optimizer

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeakerError};
use crate::model::layers::Param;

/// Adam hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// Adam with bias correction folded into the step size.
///
/// Moment buffers are created on the first step and matched to parameters
/// by position, so the parameter list must keep the same order.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    iterations: i32,
    moments: Vec<(Array2<f32>, Array2<f32>)>,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            iterations: 0,
            moments: Vec::new(),
        }
    }

    pub fn iterations(&self) -> i32 {
        self.iterations
    }

    /// Apply one update using each parameter's gradient times `grad_scale`.
    pub fn step(&mut self, params: Vec<&mut Param>, grad_scale: f32) -> Result<()> {
        if self.moments.is_empty() {
            self.moments = params
                .iter()
                .map(|p| {
                    (
                        Array2::zeros(p.value.raw_dim()),
                        Array2::zeros(p.value.raw_dim()),
                    )
                })
                .collect();
        }
        if self.moments.len() != params.len() {
            return Err(SpeakerError::TrainingError {
                reason: format!(
                    "optimizer tracks {} parameters but received {}",
                    self.moments.len(),
                    params.len()
                ),
            });
        }

        self.iterations += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let t = self.iterations;
        let lr_t = learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));

        for (param, (m, v)) in params.into_iter().zip(self.moments.iter_mut()) {
            Zip::from(&mut param.value)
                .and(&param.grad)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    let g = g * grad_scale;
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *w -= lr_t * *m / (v.sqrt() + epsilon);
                });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut param = Param::from(array![[1.0f32, -1.0]]);
        param.grad = array![[0.5, -2.0]];

        let mut adam = Adam::new(AdamConfig::default());
        adam.step(vec![&mut param], 1.0).unwrap();

        // with bias correction the first step is ~lr * sign(g)
        assert_relative_eq!(param.value[[0, 0]], 1.0 - 0.001, epsilon = 1e-6);
        assert_relative_eq!(param.value[[0, 1]], -1.0 + 0.001, epsilon = 1e-6);
        assert_eq!(adam.iterations(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut param = Param::from(array![[3.0f32]]);
        let mut adam = Adam::new(AdamConfig {
            learning_rate: 0.1,
            ..AdamConfig::default()
        });

        for _ in 0..1000 {
            // d/dw (w - 1)^2
            param.grad = param.value.mapv(|w| 2.0 * (w - 1.0));
            adam.step(vec![&mut param], 1.0).unwrap();
        }
        assert_relative_eq!(param.value[[0, 0]], 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_parameter_count_change_is_rejected() {
        let mut a = Param::from(array![[1.0f32]]);
        let mut b = Param::from(array![[1.0f32]]);
        let mut adam = Adam::new(AdamConfig::default());

        adam.step(vec![&mut a], 1.0).unwrap();
        let err = adam.step(vec![&mut a, &mut b], 1.0).unwrap_err();
        assert_eq!(err.error_code(), "TRAINING_ERROR");
    }
}
