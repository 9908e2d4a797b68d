//! Short-time Fourier transform front-end.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Periodic Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// Power spectrogram with centered frames.
///
/// The signal is zero-padded by `n_fft / 2` on both sides, so frame `t`
/// is centered on sample `t * hop_length` and there are
/// `1 + len / hop_length` frames. Output shape is `[frames, n_fft / 2 + 1]`.
pub struct PowerSpectrogram {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl PowerSpectrogram {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            fft: planner.plan_fft_forward(n_fft),
        }
    }

    pub fn num_frames(&self, num_samples: usize) -> usize {
        1 + num_samples / self.hop_length
    }

    pub fn compute(&self, samples: &[f32]) -> Array2<f32> {
        let pad = self.n_fft / 2;
        let n_bins = self.n_fft / 2 + 1;
        let num_frames = self.num_frames(samples.len());

        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let mut power = Array2::<f32>::zeros((num_frames, n_bins));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];

        for t in 0..num_frames {
            let start = t * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }

            self.fft.process(&mut buffer);

            for (k, bin) in buffer.iter().take(n_bins).enumerate() {
                power[[t, k]] = bin.norm_sqr();
            }
        }

        power
    }
}
