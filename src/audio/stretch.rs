//! Phase-vocoder time stretching of complex STFT frames.
//!
//! For a rate `r`, output frame `k` samples the input at `t_k = k * r`:
//!
//! ```text
//! mag_k   = (1 - α) |X[i]| + α |X[i+1]|          i = floor(t_k), α = t_k - i
//! φ_0     = ∠X[0]
//! φ_{k+1} = φ_k + ω_f + wrap(∠X[i+1] - ∠X[i] - ω_f)
//! Y[k]    = mag_k · e^{jφ_k}
//! ```
//!
//! with `ω_f = π · hop · f / (F - 1)` the expected phase advance of bin `f`
//! and `wrap` folding into [-π, π]. `r < 1` lengthens, `r > 1` shortens.
//!
//! [`StretchPolicy`] decides per call whether to stretch and at what rate;
//! it only ever fires in [`Mode::Training`].

use std::f64::consts::PI;

use candle_core::{DType, Tensor};
use rand::Rng;

use crate::config::StretchParams;
use crate::{Error, Result};

/// Execution mode, passed per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Training,
    #[default]
    Inference,
}

/// Stochastic gate and rate distribution for time stretching.
#[derive(Debug, Clone, Copy)]
pub struct StretchPolicy {
    prob: f64,
    max: f64,
}

impl StretchPolicy {
    pub fn new(params: StretchParams) -> Result<Self> {
        if !(0.0..=1.0).contains(&params.prob) {
            return Err(Error::Config(format!(
                "stretch prob must be in [0, 1], got {}",
                params.prob
            )));
        }
        if !(params.max >= 0.0 && params.max < 1.0) {
            return Err(Error::Config(format!(
                "stretch max must be in [0, 1), got {}",
                params.max
            )));
        }
        Ok(Self {
            prob: params.prob,
            max: params.max,
        })
    }

    pub fn params(&self) -> StretchParams {
        StretchParams {
            prob: self.prob,
            max: self.max,
        }
    }

    /// Draw a stretch rate, or `None` if this call is not stretched.
    ///
    /// Inference mode never stretches and leaves `rng` untouched.
    pub fn draw<R: Rng + ?Sized>(&self, mode: Mode, rng: &mut R) -> Option<f64> {
        if mode == Mode::Inference || !rng.random_bool(self.prob) {
            return None;
        }
        let u = rng.random_range(-self.max..=self.max);
        Some(1.0 - u)
    }
}

/// Valid frame counts after stretching by `rate`: `floor(len / rate) + 1`.
///
/// Never undercounts the frames [`TimeStretch::forward`] produces from them.
pub fn stretch_lengths(lengths: &[usize], rate: f64) -> Vec<usize> {
    lengths
        .iter()
        .map(|&l| (l as f64 / rate).floor() as usize + 1)
        .collect()
}

/// Phase vocoder bound to an STFT's hop length and bin count.
#[derive(Debug, Clone)]
pub struct TimeStretch {
    hop_length: usize,
    /// Expected phase advance per hop for each frequency bin.
    phase_advance: Vec<f64>,
}

impl TimeStretch {
    pub fn new(hop_length: usize, num_freqs: usize) -> Result<Self> {
        if hop_length == 0 || num_freqs == 0 {
            return Err(Error::Config(format!(
                "time stretch needs positive hop and bin count, got hop={hop_length} bins={num_freqs}"
            )));
        }
        let denom = (num_freqs - 1).max(1) as f64;
        let phase_advance = (0..num_freqs)
            .map(|f| PI * hop_length as f64 * f as f64 / denom)
            .collect();
        Ok(Self {
            hop_length,
            phase_advance,
        })
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn num_freqs(&self) -> usize {
        self.phase_advance.len()
    }

    /// Output frames for `frames` input frames: `ceil(frames / rate)`.
    pub fn num_frames(frames: usize, rate: f64) -> usize {
        (frames as f64 / rate).ceil() as usize
    }

    /// `[B, F, T, 2]` → `[B, F, ceil(T / rate), 2]`.
    pub fn forward(&self, stft: &Tensor, rate: f64) -> Result<Tensor> {
        check_rate(rate)?;
        let (batch, freqs, frames, parts) = stft.dims4()?;
        if parts != 2 || freqs != self.num_freqs() {
            return Err(Error::shape(
                "time stretch input",
                format!("[batch, {}, frames, 2]", self.num_freqs()),
                format!("{:?}", stft.dims()),
            ));
        }

        let out_frames = Self::num_frames(frames, rate);
        if out_frames == 0 {
            return Ok(Tensor::zeros((batch, freqs, 0, 2), DType::F32, stft.device())?);
        }
        let positions: Vec<f64> = (0..out_frames).map(|k| k as f64 * rate).collect();
        let input = stft.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

        let mut output = Vec::with_capacity(batch * freqs * out_frames * 2);
        for (row_index, row) in input.chunks_exact(frames * 2).enumerate() {
            let advance = self.phase_advance[row_index % freqs];
            stretch_row(row, &positions, advance, &mut output);
        }

        Ok(Tensor::from_vec(
            output,
            (batch, freqs, out_frames, 2),
            stft.device(),
        )?)
    }
}

fn check_rate(rate: f64) -> Result<()> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(Error::Config(format!(
            "stretch rate must be positive and finite, got {rate}"
        )));
    }
    Ok(())
}

/// Resample one frequency bin's frame sequence (interleaved re, im).
fn stretch_row(row: &[f32], positions: &[f64], advance: f64, output: &mut Vec<f32>) {
    let frames = row.len() / 2;
    // Frames past the end read as zero.
    let frame = |i: usize| -> (f64, f64) {
        if i < frames {
            (row[2 * i] as f64, row[2 * i + 1] as f64)
        } else {
            (0.0, 0.0)
        }
    };

    let (re, im) = frame(0);
    let mut phase = im.atan2(re);

    for &t in positions {
        let i = t.floor() as usize;
        let alpha = t - i as f64;
        let (re0, im0) = frame(i);
        let (re1, im1) = frame(i + 1);

        let mag = (1.0 - alpha) * re0.hypot(im0) + alpha * re1.hypot(im1);
        output.push((mag * phase.cos()) as f32);
        output.push((mag * phase.sin()) as f32);

        let delta = im1.atan2(re1) - im0.atan2(re0) - advance;
        let delta = delta - 2.0 * PI * (delta / (2.0 * PI)).round();
        phase += delta + advance;
    }
}
