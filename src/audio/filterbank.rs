//! Mel filterbank construction and projection.
//!
//! Filter edges are given as fractions of the Nyquist frequency, so the
//! same configuration works for any FFT size. The sample rate only shapes
//! the mel warping between those edges.

use candle_core::{Device, Tensor};

use crate::config::{MelNorm, MelScale};
use crate::{Error, Result};

/// Parameters of a mel filterbank.
#[derive(Debug, Clone)]
pub struct FilterbankConfig {
    pub num_mels: usize,
    /// One-sided FFT bins, `fft_length / 2 + 1`.
    pub num_freqs: usize,
    pub sample_rate: u32,
    /// Fraction of Nyquist, in [0, max_freq).
    pub min_freq: f64,
    /// Fraction of Nyquist, in (0, 1].
    pub max_freq: f64,
    pub scale: MelScale,
    pub norm: MelNorm,
}

/// Immutable `[num_mels, num_freqs]` weight matrix.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct Filterbank {
    weights: Tensor,
    num_mels: usize,
    num_freqs: usize,
}

impl Filterbank {
    /// Build the triangular filters and upload them to `device`.
    pub fn new(config: &FilterbankConfig, device: &Device) -> Result<Self> {
        let rows = mel_filterbank(config)?;
        let data: Vec<f32> = rows.into_iter().flatten().map(|w| w as f32).collect();
        let weights = Tensor::from_vec(data, (config.num_mels, config.num_freqs), device)?;
        Ok(Self {
            weights,
            num_mels: config.num_mels,
            num_freqs: config.num_freqs,
        })
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn num_mels(&self) -> usize {
        self.num_mels
    }

    pub fn num_freqs(&self) -> usize {
        self.num_freqs
    }
}

/// Projects `[B, F, T]` spectrograms onto a [`Filterbank`], giving `[B, M, T]`.
#[derive(Debug, Clone)]
pub struct ApplyFilterbank {
    filterbank: Filterbank,
}

impl ApplyFilterbank {
    pub fn new(filterbank: Filterbank) -> Self {
        Self { filterbank }
    }

    pub fn filterbank(&self) -> &Filterbank {
        &self.filterbank
    }

    pub fn forward(&self, spec: &Tensor) -> Result<Tensor> {
        let (batch, freqs, frames) = spec.dims3()?;
        if freqs != self.filterbank.num_freqs {
            return Err(Error::shape(
                "filterbank input",
                format!("{} frequency bins", self.filterbank.num_freqs),
                format!("{freqs} frequency bins"),
            ));
        }
        let num_mels = self.filterbank.num_mels;
        let weights = self
            .filterbank
            .weights
            .to_dtype(spec.dtype())?
            .unsqueeze(0)?
            .broadcast_as((batch, num_mels, freqs))?
            .contiguous()?;
        let mel = weights.matmul(&spec.contiguous()?)?;
        debug_assert_eq!(mel.dims(), &[batch, num_mels, frames]);
        Ok(mel)
    }
}

/// Build triangular mel filters, `num_mels` rows of `num_freqs` weights.
fn mel_filterbank(config: &FilterbankConfig) -> Result<Vec<Vec<f64>>> {
    if config.num_mels == 0 {
        return Err(Error::Config("num_mels must be positive".into()));
    }
    if !(config.max_freq > 0.0 && config.max_freq <= 1.0) {
        return Err(Error::Config(format!(
            "max_freq must be in (0, 1], got {}",
            config.max_freq
        )));
    }
    if !(config.min_freq >= 0.0 && config.min_freq < config.max_freq) {
        return Err(Error::Config(format!(
            "min_freq must be in [0, max_freq), got {}",
            config.min_freq
        )));
    }
    if config.num_freqs < 2 {
        return Err(Error::Config(format!(
            "filterbank needs at least 2 frequency bins, got {}",
            config.num_freqs
        )));
    }

    let nyquist = config.sample_rate as f64 / 2.0;
    let mel_min = hz_to_mel(config.min_freq * nyquist, config.scale);
    let mel_max = hz_to_mel(config.max_freq * nyquist, config.scale);

    // n_mels + 2 edges, evenly spaced on the mel axis.
    let hz_points: Vec<f64> = (0..=(config.num_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (config.num_mels + 1) as f64)
        .map(|m| mel_to_hz(m, config.scale))
        .collect();

    let bin_freqs: Vec<f64> = (0..config.num_freqs)
        .map(|i| nyquist * i as f64 / (config.num_freqs - 1) as f64)
        .collect();

    let filters: Vec<Vec<f64>> = hz_points
        .windows(3)
        .map(|edges| {
            let (f_left, f_center, f_right) = (edges[0], edges[1], edges[2]);
            let scale = match config.norm {
                MelNorm::None => 1.0,
                MelNorm::Slaney => 2.0 / (f_right - f_left),
            };
            bin_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - f_left) / (f_center - f_left);
                    let falling = (f_right - f) / (f_right - f_center);
                    scale * rising.min(falling).max(0.0)
                })
                .collect::<Vec<f64>>()
        })
        .collect();

    Ok(filters)
}

fn hz_to_mel(hz: f64, scale: MelScale) -> f64 {
    match scale {
        MelScale::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
        MelScale::Slaney => hz_to_mel_slaney(hz),
    }
}

fn mel_to_hz(mel: f64, scale: MelScale) -> f64 {
    match scale {
        MelScale::Htk => 700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0),
        MelScale::Slaney => mel_to_hz_slaney(mel),
    }
}

/// Below 1000 Hz: `mel = 3 * f / 200`. Above: `15 + 27 * ln(f / 1000) / ln(6.4)`.
fn hz_to_mel_slaney(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / (6.4_f64).ln()
    }
}

fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * (6.4_f64).ln() / 27.0).exp()
    }
}
