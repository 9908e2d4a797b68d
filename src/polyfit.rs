//! Polynomial fit of a waveform for circuit inputs
//!
//! Fits `y = c0 + c1 x + ... + cd x^d` to a recording, with `x` the sample
//! index scaled to [0, 1], by solving the ridge-regularized normal
//! equations. The coefficients and one evaluated point are written as
//! `{ "coeffs", "x", "y" }` JSON, the input format of the Circom circuit.

use std::fs;
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::audio::load_mono;
use crate::error::{Result, SpeakerError};

pub const DEFAULT_DEGREE: usize = 5;
pub const DEFAULT_EVAL_X: f64 = 10.0;
pub const DEFAULT_OUTPUT_PATH: &str = "circom_input.json";

/// Added to the normal-equation diagonal
const RIDGE: f64 = 1e-6;

/// Coefficients plus one point on the fitted curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitInput {
    pub coeffs: Vec<f64>,
    pub x: f64,
    pub y: f64,
}

impl CircuitInput {
    pub fn new(coeffs: Vec<f64>, x: f64) -> Self {
        let y = evaluate_polynomial(&coeffs, x);
        Self { coeffs, x, y }
    }

    /// Fit a recording and evaluate the fit at `x`
    pub fn from_file(path: &Path, degree: usize, x: f64) -> Result<Self> {
        let (samples, sample_rate) = load_mono(path)?;
        info!(
            "Fitting degree {} polynomial to {} samples of {} ({} Hz)",
            degree,
            samples.len(),
            path.display(),
            sample_rate
        );
        let coeffs = fit_polynomial(&samples, degree)?;
        Ok(Self::new(coeffs, x))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| SpeakerError::FileWriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Saved circuit input to {}", path.display());
        Ok(())
    }
}

/// Least-squares polynomial coefficients, lowest order first
///
/// # Errors
/// * `InsufficientSamples` - If there are fewer than `degree + 1` samples,
///   or fewer than two
/// * `SingularMatrix` - If the normal equations cannot be solved
pub fn fit_polynomial(samples: &[f32], degree: usize) -> Result<Vec<f64>> {
    let n = samples.len();
    if n < 2 || n <= degree {
        return Err(SpeakerError::InsufficientSamples {
            degree,
            samples: n,
        });
    }

    let last = (n - 1) as f64;
    let vandermonde = Array2::from_shape_fn((n, degree + 1), |(i, j)| {
        (i as f64 / last).powi(j as i32)
    });
    let y = Array1::from_iter(samples.iter().map(|&s| s as f64));

    let lhs = vandermonde.t().dot(&vandermonde) + Array2::<f64>::eye(degree + 1) * RIDGE;
    let rhs = vandermonde.t().dot(&y);

    let coeffs = solve_linear_system(lhs, rhs)?;
    debug!("Fitted coefficients: {:?}", coeffs);
    Ok(coeffs.to_vec())
}

/// Horner evaluation of `coeffs` (lowest order first) at `x`
pub fn evaluate_polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting
///
/// # Errors
/// * `ShapeMismatch` - If `a` is not square or `b` does not match it
/// * `SingularMatrix` - If a pivot vanishes relative to the matrix scale
pub fn solve_linear_system(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(SpeakerError::ShapeMismatch {
            expected: vec![n, n, n],
            actual: vec![a.nrows(), a.ncols(), b.len()],
        });
    }

    let scale = a.fold(0.0f64, |acc, &v| acc.max(v.abs()));
    let tolerance = scale * n as f64 * f64::EPSILON;

    for i in 0..n {
        let pivot = (i..n)
            .max_by(|&p, &q| a[[p, i]].abs().total_cmp(&a[[q, i]].abs()))
            .unwrap_or(i);
        if a[[pivot, i]].abs() <= tolerance {
            return Err(SpeakerError::SingularMatrix { pivot: i });
        }

        if pivot != i {
            for col in 0..n {
                a.swap([i, col], [pivot, col]);
            }
            b.swap(i, pivot);
        }

        for k in (i + 1)..n {
            let factor = a[[k, i]] / a[[i, i]];
            for j in i..n {
                a[[k, j]] -= factor * a[[i, j]];
            }
            b[k] -= factor * b[i];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let tail: f64 = ((i + 1)..n).map(|j| a[[i, j]] * x[j]).sum();
        x[i] = (b[i] - tail) / a[[i, i]];
    }
    Ok(x)
}
