//! In-memory waveform shared by every pipeline stage.

/// Sample rate produced by the SpeechT5 HiFi-GAN vocoder.
pub const SAMPLE_RATE: u32 = 16_000;

/// Peak magnitude below which a model waveform counts as silent.
pub const SILENCE_EPSILON: f32 = 1e-4;

/// Mono floating-point audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds (0.0 for a zero sample rate).
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Largest absolute sample value; NaNs are ignored.
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .filter(|s| s.is_finite())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// `true` when every sample is below [`SILENCE_EPSILON`] (or there are none).
    ///
    /// A model that "succeeds" with this output has misfired; the narrator
    /// treats it exactly like an inference error.
    pub fn is_effectively_silent(&self) -> bool {
        self.samples.iter().all(|s| !(s.abs() >= SILENCE_EPSILON))
    }

    /// Copy with non-finite samples zeroed and the rest clamped to `[-1, 1]`.
    pub fn sanitized(&self) -> Self {
        let samples = self
            .samples
            .iter()
            .map(|&s| if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 })
            .collect();
        Self { samples, sample_rate: self.sample_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let w = Waveform::new(vec![0.0; 32_000], SAMPLE_RATE);
        assert!((w.duration_secs() - 2.0).abs() < 1e-6);
        assert_eq!(Waveform::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }

    #[test]
    fn test_silence_detection() {
        assert!(Waveform::new(vec![], SAMPLE_RATE).is_effectively_silent());
        assert!(Waveform::new(vec![0.0; 100], SAMPLE_RATE).is_effectively_silent());
        assert!(Waveform::new(vec![5e-5, -5e-5], SAMPLE_RATE).is_effectively_silent());
        assert!(!Waveform::new(vec![0.0, 0.2, 0.0], SAMPLE_RATE).is_effectively_silent());
    }

    #[test]
    fn test_nan_only_is_silent() {
        // NaN compares false against everything; it must not count as signal.
        let w = Waveform::new(vec![f32::NAN, f32::NAN], SAMPLE_RATE);
        assert!(w.is_effectively_silent());
    }

    #[test]
    fn test_sanitized() {
        let w = Waveform::new(vec![f32::NAN, 1.5, -2.0, 0.25, f32::INFINITY], SAMPLE_RATE);
        assert_eq!(w.sanitized().samples, vec![0.0, 1.0, -1.0, 0.25, 0.0]);
        assert_eq!(w.peak(), 2.0);
    }
}
