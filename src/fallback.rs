//! Deterministic substitute audio used whenever synthesis cannot deliver.
//!
//! The fallback is an audible tone, not silence: a listener (and a test) can
//! tell at once that the model path was skipped. Its length tracks the text so
//! playback UIs still show a plausible duration.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::audio::{Waveform, SAMPLE_RATE};

/// Tone parameters. Every field is fixed at configuration time, which keeps the
/// output a pure function of the text length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    /// Seconds of tone per Unicode character of input.
    pub secs_per_char: f32,
    /// Tone frequency in Hz.
    pub frequency_hz: f32,
    /// Peak amplitude in `[0, 1]`.
    pub amplitude: f32,
    pub sample_rate: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            secs_per_char: 0.1,
            frequency_hz: 440.0,
            amplitude: 0.1,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FallbackGenerator {
    config: FallbackConfig,
}

impl FallbackGenerator {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Number of samples the fallback clip for `text` will contain.
    ///
    /// Empty text is billed as one character so the clip is never empty.
    pub fn sample_count(&self, text: &str) -> usize {
        let chars = text.chars().count().max(1);
        let secs = chars as f64 * self.config.secs_per_char.max(0.0) as f64;
        ((secs * self.sample_rate() as f64).round() as usize).max(1)
    }

    /// Produce the tone for `text`. Never fails.
    pub fn generate(&self, text: &str) -> Waveform {
        let rate = self.sample_rate();
        let amplitude = if self.config.amplitude.is_finite() {
            self.config.amplitude.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let step = 2.0 * PI * self.config.frequency_hz / rate as f32;
        let samples = (0..self.sample_count(text))
            .map(|i| amplitude * (step * i as f32).sin())
            .collect();
        Waveform::new(samples, rate)
    }

    fn sample_rate(&self) -> u32 {
        if self.config.sample_rate == 0 {
            SAMPLE_RATE
        } else {
            self.config.sample_rate
        }
    }
}
