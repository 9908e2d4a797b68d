//! Audio file I/O for speaker-verify
//!
//! Reads WAV files of any common bit depth, folds them to mono and brings
//! them to the analysis sample rate. Resampling uses linear interpolation.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SpeakerError};

/// Load a WAV file as a mono waveform at `target_rate`
///
/// Integer samples are scaled to [-1, 1], channels are averaged and the
/// signal is resampled when the file rate differs from `target_rate`.
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidAudio` - If the file is not a valid WAV file
/// * `UnsupportedFormat` - If the bit depth cannot be decoded
/// * `EmptyAudio` - If the file holds no samples
pub fn load_waveform(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let (mono, file_rate) = load_mono(path)?;
    if file_rate == target_rate {
        return Ok(mono);
    }

    debug!(
        "Resampling {} from {} Hz to {} Hz",
        path.display(),
        file_rate,
        target_rate
    );
    Ok(resample_linear(&mono, file_rate, target_rate))
}

/// Load a WAV file as a mono waveform at its own sample rate
///
/// Returns the samples and the file's rate. Errors as [`load_waveform`].
pub fn load_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    if !path.exists() {
        return Err(SpeakerError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let reader = WavReader::open(path).map_err(|e| SpeakerError::InvalidAudio {
        path: path.to_path_buf(),
        reason: format!("Failed to open WAV file: {}", e),
        source: Some(e),
    })?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved = read_samples_as_f32(reader, path, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.len() < channels {
        return Err(SpeakerError::EmptyAudio {
            path: path.to_path_buf(),
        });
    }

    let mono = downmix(&interleaved, channels);
    debug!(
        "Loaded {} ({} ch, {}-bit, {} Hz, {} samples)",
        path.display(),
        channels,
        spec.bits_per_sample,
        spec.sample_rate,
        mono.len()
    );

    Ok((mono, spec.sample_rate))
}

/// Write a mono waveform as a 16-bit PCM WAV file
pub fn write_waveform(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|e| to_write_error(path, e))?;

    for &sample in samples {
        let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(scaled)
            .map_err(|e| to_write_error(path, e))?;
    }

    writer.finalize().map_err(|e| to_write_error(path, e))?;

    Ok(())
}

/// Generate a sine tone
pub fn generate_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;

    (0..num_samples)
        .map(|i| 0.5 * (angular_freq * i as f32).sin())
        .collect()
}

/// Generate a crude voiced signal: a harmonic stack with slow pitch
/// wobble and a little noise
///
/// Different fundamentals give clearly different cepstra, which makes
/// this useful as a stand-in for two speakers in tests.
pub fn generate_voice_like(
    fundamental: f32,
    duration_secs: f32,
    sample_rate: u32,
    seed: u64,
) -> Vec<f32> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let two_pi = 2.0 * std::f32::consts::PI;
    let mut phase = 0.0f32;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let f0 = fundamental * (1.0 + 0.02 * (two_pi * 5.0 * t).sin());
            phase += two_pi * f0 / sample_rate as f32;

            let voiced: f32 = (1..=6)
                .map(|h| (phase * h as f32).sin() / h as f32)
                .sum();
            let noise: f32 = rng.gen_range(-0.02..0.02);

            0.3 * voiced + noise
        })
        .collect()
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn to_write_error(path: &Path, e: hound::Error) -> SpeakerError {
    match e {
        hound::Error::IoError(source) => SpeakerError::FileWriteError {
            path: path.to_path_buf(),
            source,
        },
        other => SpeakerError::FileWriteError {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        },
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    path: &Path,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |bits: u16, e: hound::Error| SpeakerError::InvalidAudio {
        path: path.to_path_buf(),
        reason: format!("Failed to read {}-bit samples: {}", bits, e),
        source: Some(e),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| invalid(bits_per_sample, e)),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                // 24-bit stored as i32 in hound
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(SpeakerError::UnsupportedFormat {
                        format: format!("{}-bit integer audio", bits_per_sample),
                    })
                }
            };

            if bits_per_sample == 8 {
                reader
                    .samples::<i8>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<f32>, _>>()
                    .map_err(|e| invalid(bits_per_sample, e))
            } else if bits_per_sample == 16 {
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<f32>, _>>()
                    .map_err(|e| invalid(bits_per_sample, e))
            } else {
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v as f64 / scale as f64) as f32))
                    .collect::<std::result::Result<Vec<f32>, _>>()
                    .map_err(|e| invalid(bits_per_sample, e))
            }
        }
    }
}

/// Average interleaved frames [L,R,L,R,...] down to one channel
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample by interpolating between neighbouring input samples
///
/// Output positions past the last input sample hold its value.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    let step = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / step).ceil() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a + (b - a) * frac,
                (Some(&a), None) => a,
                _ => last,
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
