//! WAV file I/O and batching of variable-length clips.

use std::path::Path;

use candle_core::{Device, Tensor};

use crate::{Error, Result};

/// Read a WAV file, return (samples, sample_rate, num_channels).
///
/// Samples are interleaved f32 in [-1, 1].
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32, u16)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok((samples, sample_rate, channels))
}

/// Write interleaved f32 samples as a 32-bit float WAV file.
pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
) -> Result<()> {
    let spec = hound::WavSpec {
        channels: num_channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Average interleaved channels down to mono.
pub fn to_mono(samples: &[f32], num_channels: u16) -> Result<Vec<f32>> {
    let channels = num_channels as usize;
    if channels == 0 || samples.len() % channels != 0 {
        return Err(Error::Audio(format!(
            "{} samples do not divide into {num_channels} channels",
            samples.len()
        )));
    }
    Ok(samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Peak-normalize audio samples to [-1, 1].
pub fn peak_normalize(samples: &mut [f32]) {
    let max_abs = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if max_abs > 1e-8 {
        let scale = 1.0 / max_abs;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

/// Zero-pad clips to a common length: `[B, max_len]` tensor plus valid lengths.
pub fn pad_batch(clips: &[Vec<f32>], device: &Device) -> Result<(Tensor, Vec<usize>)> {
    let lengths: Vec<usize> = clips.iter().map(Vec::len).collect();
    let max_len = lengths.iter().copied().max().unwrap_or(0);
    let mut data = Vec::with_capacity(clips.len() * max_len);
    for clip in clips {
        data.extend_from_slice(clip);
        data.resize(data.len() + max_len - clip.len(), 0.0);
    }
    let batch = Tensor::from_vec(data, (clips.len(), max_len), device)?;
    Ok((batch, lengths))
}
