//! Playback-speed adjustment.
//!
//! Two interchangeable strategies sit behind [`SpeedAdjuster`]:
//!
//! | Mode                        | Duration      | Pitch                         |
//! |-----------------------------|---------------|-------------------------------|
//! | [`SpeedMode::TimeStretch`]  | `len / factor`| preserved (WSOLA)             |
//! | [`SpeedMode::Resample`]     | `len / factor`| scaled by `factor` (rubato)   |
//!
//! The resampler is the cheap option; its pitch shift is part of its contract,
//! not a defect. A factor of exactly 1.0 is returned untouched by both.

use std::f32::consts::PI;

use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::Waveform;

/// WSOLA analysis / synthesis frame length in samples (32 ms at 16 kHz).
const FRAME: usize = 512;

/// Synthesis hop: 50 % overlap, where a periodic Hann window sums to one.
const HOP: usize = FRAME / 2;

/// Search radius (samples) around the nominal analysis position.
const TOLERANCE: usize = 128;

/// Which speed strategy to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    #[default]
    TimeStretch,
    Resample,
}

impl SpeedMode {
    pub fn adjuster(self) -> Box<dyn SpeedAdjuster> {
        match self {
            SpeedMode::TimeStretch => Box::new(TimeStretch),
            SpeedMode::Resample => Box::new(Resample),
        }
    }
}

/// Changes the playback speed of a waveform by `factor` (2.0 = twice as fast).
pub trait SpeedAdjuster: Send + Sync {
    fn adjust(&self, waveform: &Waveform, factor: f32) -> Waveform;

    fn mode(&self) -> SpeedMode;
}

/// `true` when `factor` should leave the waveform untouched.
fn is_identity(factor: f32) -> bool {
    !factor.is_finite() || factor <= 0.0 || (factor - 1.0).abs() <= f32::EPSILON
}

fn output_len(input_len: usize, factor: f32) -> usize {
    (input_len as f64 / factor as f64).round() as usize
}

// ─────────────────────────────────────────────────────────────────────────────
// Resampling
// ─────────────────────────────────────────────────────────────────────────────

/// Converts `sample_rate` to `sample_rate / factor` and plays the result back
/// at the original rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resample;

impl SpeedAdjuster for Resample {
    fn adjust(&self, waveform: &Waveform, factor: f32) -> Waveform {
        if is_identity(factor) || waveform.is_empty() {
            return waveform.clone();
        }
        let samples = resample(&waveform.samples, waveform.sample_rate, factor);
        Waveform::new(samples, waveform.sample_rate)
    }

    fn mode(&self) -> SpeedMode {
        SpeedMode::Resample
    }
}

/// Input frames per rubato block.
const CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample to exactly `output_len(input.len(), factor)` samples.
///
/// A resampler that cannot be built or run leaves the input untouched.
fn resample(input: &[f32], sample_rate: u32, factor: f32) -> Vec<f32> {
    let target_rate = (sample_rate as f64 / factor as f64).round() as usize;
    match fft_resample(input, sample_rate as usize, target_rate) {
        Ok(mut out) => {
            out.resize(output_len(input.len(), factor), 0.0);
            out
        }
        Err(e) => {
            warn!(error = %e, sample_rate, target_rate, "resampling failed; speed unchanged");
            input.to_vec()
        }
    }
}

fn fft_resample(input: &[f32], rate_in: usize, rate_out: usize) -> anyhow::Result<Vec<f32>> {
    let mut resampler = FftFixedIn::<f32>::new(rate_in, rate_out, CHUNK, SUB_CHUNKS, 1)?;
    let delay = resampler.output_delay();
    let wanted = (input.len() as f64 * rate_out as f64 / rate_in as f64).ceil() as usize + delay;
    let mut out = Vec::with_capacity(wanted + CHUNK);

    let mut blocks = input.chunks_exact(CHUNK);
    for block in &mut blocks {
        let frames = resampler.process(&[block][..], None)?;
        out.extend_from_slice(&frames[0]);
    }
    let rest = blocks.remainder();
    if !rest.is_empty() {
        let frames = resampler.process_partial(Some(&[rest][..]), None)?;
        out.extend_from_slice(&frames[0]);
    }
    // Flush the filter tail until the delayed signal is complete.
    while out.len() < wanted {
        let frames = resampler.process_partial(None::<&[&[f32]]>, None)?;
        if frames[0].is_empty() {
            break;
        }
        out.extend_from_slice(&frames[0]);
    }

    out.drain(..delay.min(out.len()));
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// WSOLA time-stretch
// ─────────────────────────────────────────────────────────────────────────────

/// Waveform-similarity overlap-add: changes duration, keeps pitch.
///
/// Clips shorter than one frame cannot be stretched meaningfully and are
/// resampled instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeStretch;

impl SpeedAdjuster for TimeStretch {
    fn adjust(&self, waveform: &Waveform, factor: f32) -> Waveform {
        if is_identity(factor) || waveform.is_empty() {
            return waveform.clone();
        }
        if waveform.len() < FRAME {
            let samples = resample(&waveform.samples, waveform.sample_rate, factor);
            return Waveform::new(samples, waveform.sample_rate);
        }
        Waveform::new(wsola(&waveform.samples, factor), waveform.sample_rate)
    }

    fn mode(&self) -> SpeedMode {
        SpeedMode::TimeStretch
    }
}

fn hann(n: usize) -> Vec<f32> {
    (0..n).map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos()).collect()
}

/// Dot product of two equally long windows of `signal`.
fn similarity(signal: &[f32], a: usize, b: usize, len: usize) -> f32 {
    signal[a..a + len]
        .iter()
        .zip(&signal[b..b + len])
        .map(|(x, y)| x * y)
        .sum()
}

fn wsola(input: &[f32], factor: f32) -> Vec<f32> {
    let out_len = output_len(input.len(), factor);
    let window = hann(FRAME);

    // Zero padding lets every candidate frame (and its natural continuation)
    // be read without bounds checks.
    let mut padded = input.to_vec();
    padded.resize(input.len() + FRAME + HOP + TOLERANCE, 0.0);
    let max_start = padded.len() - FRAME - HOP;

    let mut output = vec![0.0f32; out_len + FRAME];
    let mut weight = vec![0.0f32; out_len + FRAME];
    let mut prev_start = 0usize;

    let mut out_pos = 0usize;
    while out_pos < out_len {
        let nominal = ((out_pos as f64 * factor as f64).round() as usize).min(max_start);
        let start = if out_pos == 0 {
            0
        } else {
            // Best match for the continuation of the previously copied frame.
            let natural = (prev_start + HOP).min(max_start);
            let lo = nominal.saturating_sub(TOLERANCE);
            let hi = (nominal + TOLERANCE).min(max_start);
            let mut best = nominal;
            let mut best_score = f32::NEG_INFINITY;
            for candidate in lo..=hi {
                let score = similarity(&padded, natural, candidate, HOP);
                if score > best_score {
                    best_score = score;
                    best = candidate;
                }
            }
            best
        };

        for (i, w) in window.iter().enumerate() {
            output[out_pos + i] += padded[start + i] * w;
            weight[out_pos + i] += w;
        }

        prev_start = start;
        out_pos += HOP;
    }

    output.truncate(out_len);
    for (s, w) in output.iter_mut().zip(&weight) {
        if *w > 1e-3 {
            *s /= w;
        }
    }
    output
}
