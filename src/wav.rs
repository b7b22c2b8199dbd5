//! WAV container encode / decode: the byte contract handed to callers.
//!
//! Output is always mono 16-bit signed PCM. Samples are scaled linearly with
//! `round(s * 32767)`; decoding divides by the same constant, so a round trip
//! is exact up to one quantisation step.

use std::io::Cursor;

use crate::{audio::Waveform, error::EncodeError};

const PCM_SCALE: f32 = i16::MAX as f32;

fn pcm_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode `waveform` as a 16-bit PCM WAV byte buffer.
///
/// Rejects non-finite samples instead of writing garbage; callers that want a
/// best-effort encode should pass [`Waveform::sanitized`] output.
pub fn encode(waveform: &Waveform) -> Result<Vec<u8>, EncodeError> {
    if waveform.sample_rate == 0 {
        return Err(EncodeError::InvalidSampleRate(0));
    }
    if let Some(index) = waveform.samples.iter().position(|s| !s.is_finite()) {
        return Err(EncodeError::NonFiniteSample { index });
    }

    let mut cursor = Cursor::new(Vec::with_capacity(44 + waveform.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, pcm_spec(waveform.sample_rate))?;
        for &s in &waveform.samples {
            let s16 = (s * PCM_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(s16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decode a mono 16-bit PCM WAV buffer back into floating-point samples.
pub fn decode(bytes: &[u8]) -> Result<Waveform, EncodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(EncodeError::UnsupportedFormat {
            channels: spec.channels,
            bits: spec.bits_per_sample,
            format: match spec.sample_format {
                hound::SampleFormat::Int => "int",
                hound::SampleFormat::Float => "float",
            },
        });
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(|v| v as f32 / PCM_SCALE))
        .collect::<Result<Vec<f32>, _>>()?;
    Ok(Waveform::new(samples, spec.sample_rate))
}

/// Playback duration of a WAV buffer in seconds; 0.0 if it cannot be parsed.
pub fn duration_secs(bytes: &[u8]) -> f32 {
    match hound::WavReader::new(Cursor::new(bytes)) {
        Ok(reader) if reader.spec().sample_rate > 0 => {
            reader.duration() as f32 / reader.spec().sample_rate as f32
        }
        _ => 0.0,
    }
}

/// `true` if `bytes` parses as a WAV container this crate can decode.
pub fn is_valid(bytes: &[u8]) -> bool {
    decode(bytes).is_ok()
}
