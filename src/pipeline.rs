//! End-to-end feature pipeline.
//!
//! ```text
//! waveform [B, L] (+ lengths in samples)
//!   → STFT                [B, F, T, 2]   lengths → frames
//!   → time stretch (opt.) [B, F, T', 2]  lengths → floor(len / r) + 1
//!   → complex norm        [B, F, T']
//!   → mel filterbank      [B, M, T']
//!   → normalization       [B, M, T']
//! ```
//!
//! The pipeline holds no per-call state. Mode and randomness are passed
//! into [`MelspectrogramStretch::forward`], so one instance can serve many
//! threads at once.

use std::fmt;

use candle_core::{Device, Tensor};
use rand::Rng;

use crate::audio::complex_norm::ComplexNorm;
use crate::audio::filterbank::{ApplyFilterbank, Filterbank, FilterbankConfig};
use crate::audio::normalize::Normalizer;
use crate::audio::stft::Stft;
use crate::audio::stretch::{Mode, StretchPolicy, TimeStretch, stretch_lengths};
use crate::batch::Batch;
use crate::config::MelStretchConfig;
use crate::{Error, Result};

/// Output of one forward call.
#[derive(Debug, Clone)]
pub struct Features {
    /// `[B, num_mels, T]`
    pub mel: Tensor,
    /// Valid frames per element, present iff lengths were supplied.
    pub lengths: Option<Vec<usize>>,
    /// Rate of the time stretch applied to this call, if any.
    pub stretch_rate: Option<f64>,
}

/// Waveform batch → normalized (optionally time-stretched) mel spectrogram.
#[derive(Debug, Clone)]
pub struct MelspectrogramStretch {
    config: MelStretchConfig,
    stft: Stft,
    time_stretch: TimeStretch,
    complex_norm: ComplexNorm,
    apply_filterbank: ApplyFilterbank,
    normalizer: Option<Normalizer>,
    policy: StretchPolicy,
}

impl MelspectrogramStretch {
    /// Validate `config` and build every stage. The filterbank lives on `device`.
    pub fn new(config: MelStretchConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let stft = Stft::new(config.fft_length, Some(config.hop_length()))?;
        let time_stretch = TimeStretch::new(stft.hop_length(), stft.num_freqs())?;
        let complex_norm = ComplexNorm::new(config.power)?;
        let filterbank = Filterbank::new(
            &FilterbankConfig {
                num_mels: config.num_mels,
                num_freqs: stft.num_freqs(),
                sample_rate: config.sample_rate,
                min_freq: config.min_freq,
                max_freq: config.max_freq,
                scale: config.mel_scale,
                norm: config.mel_norm,
            },
            device,
        )?;
        let normalizer = Normalizer::new(config.norm, config.db, config.whiten)?;
        let policy = StretchPolicy::new(config.stretch)?;

        tracing::info!(
            "MelspectrogramStretch: fft={} hop={} mels={} norm={} stretch=({}, {})",
            config.fft_length,
            stft.hop_length(),
            config.num_mels,
            config.norm.name(),
            config.stretch.prob,
            config.stretch.max,
        );

        Ok(Self {
            config,
            stft,
            time_stretch,
            complex_norm,
            apply_filterbank: ApplyFilterbank::new(filterbank),
            normalizer,
            policy,
        })
    }

    pub fn config(&self) -> &MelStretchConfig {
        &self.config
    }

    pub fn stft(&self) -> &Stft {
        &self.stft
    }

    pub fn filterbank(&self) -> &Filterbank {
        self.apply_filterbank.filterbank()
    }

    pub fn policy(&self) -> &StretchPolicy {
        &self.policy
    }

    /// Run the pipeline, drawing the stretch decision from `rng`.
    ///
    /// In [`Mode::Inference`] no stretch is applied and `rng` is not used.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        waveform: &Tensor,
        lengths: Option<&[usize]>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Features> {
        let rate = self.policy.draw(mode, rng);
        self.forward_with_rate(waveform, lengths, rate)
    }

    /// Run the pipeline with a pre-drawn stretch rate (`None` skips the stretch).
    pub fn forward_with_rate(
        &self,
        waveform: &Tensor,
        lengths: Option<&[usize]>,
        rate: Option<f64>,
    ) -> Result<Features> {
        let batch_size = waveform.dims().first().copied().unwrap_or(0);
        if let Some(lengths) = lengths
            && lengths.len() != batch_size
        {
            return Err(Error::shape(
                "length vector",
                format!("{batch_size} entries"),
                format!("{} entries", lengths.len()),
            ));
        }
        let num_samples = waveform.dims().get(1).copied().unwrap_or(0);
        if let Some(lengths) = lengths
            && let Some(&longest) = lengths.iter().max()
            && longest > num_samples
        {
            return Err(Error::shape(
                "length vector",
                format!("lengths <= {num_samples} samples"),
                format!("length {longest}"),
            ));
        }

        let x = Batch::new(waveform.clone(), lengths.map(<[usize]>::to_vec))
            .map_with_lengths(|w| self.stft.forward(w), |l| self.stft.lengths(l))?;

        let x = match rate {
            Some(rate) => x.map_with_lengths(
                |s| self.time_stretch.forward(s, rate),
                |l| stretch_lengths(l, rate),
            )?,
            None => x,
        };

        let x = x
            .map(|s| self.complex_norm.forward(s))?
            .map(|s| self.apply_filterbank.forward(s))?;

        let x = match &self.normalizer {
            Some(normalizer) => x.map(|s| normalizer.forward(s))?,
            None => x,
        };

        let (mel, lengths) = x.into_parts();
        tracing::debug!(
            "forward: input {:?} → mel {:?}, stretch {:?}",
            waveform.dims(),
            mel.dims(),
            rate
        );

        Ok(Features {
            mel,
            lengths,
            stretch_rate: rate,
        })
    }
}

impl fmt::Display for MelspectrogramStretch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MelspectrogramStretch(num_mels={}, fft_length={}, norm={}, stretch_param=({}, {}))",
            self.config.num_mels,
            self.config.fft_length,
            self.config.norm.name(),
            self.config.stretch.prob,
            self.config.stretch.max,
        )
    }
}
