//! Mel-scale utilities and filterbank generation.
//!
//! Uses the Slaney mel scale (linear below 1 kHz, logarithmic above) and
//! Slaney area normalization.

use ndarray::Array2;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Converts frequency in Hz to the Slaney mel scale.
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Converts a Slaney mel value back to Hz.
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (stop - start) / (n - 1) as f64;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Creates the mel filterbank matrix.
///
/// Returns `[n_mels, n_fft / 2 + 1]`; multiply a power spectrum by its
/// transpose to get mel band energies.
pub fn mel_filter_bank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f64,
    fmax: f64,
) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    // n_mels + 2 band edges, equally spaced in mel
    let mel_f: Vec<f64> = linspace(hz_to_mel(fmin), hz_to_mel(fmax), n_mels + 2)
        .into_iter()
        .map(mel_to_hz)
        .collect();

    let mut bank = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let lower_width = mel_f[m + 1] - mel_f[m];
        let upper_width = mel_f[m + 2] - mel_f[m + 1];
        let enorm = 2.0 / (mel_f[m + 2] - mel_f[m]);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - mel_f[m]) / lower_width;
            let upper = (mel_f[m + 2] - freq) / upper_width;
            let weight = lower.min(upper).max(0.0);
            bank[[m, k]] = (weight * enorm) as f32;
        }
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hz_mel_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 4000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert_relative_eq!(hz, back, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_slaney_scale_is_linear_below_1khz() {
        assert_relative_eq!(hz_to_mel(500.0), 7.5, epsilon = 1e-9);
        assert_relative_eq!(hz_to_mel(1000.0), 15.0, epsilon = 1e-9);
        assert!(hz_to_mel(2000.0) > 15.0);
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let bank = mel_filter_bank(16000, 2048, 128, 0.0, 8000.0);
        assert_eq!(bank.dim(), (128, 1025));

        assert!(bank.iter().all(|&w| w >= 0.0));
        for row in bank.rows() {
            assert!(row.sum() > 0.0, "every band should cover at least one bin");
        }
    }

    #[test]
    fn test_filters_move_up_in_frequency() {
        let bank = mel_filter_bank(16000, 512, 40, 0.0, 8000.0);
        let peak_bin = |m: usize| {
            bank.row(m)
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |best, (k, &w)| if w > best.1 { (k, w) } else { best })
                .0
        };
        for m in 1..40 {
            assert!(peak_bin(m) >= peak_bin(m - 1));
        }
    }
}
