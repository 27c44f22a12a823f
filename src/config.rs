//! Pipeline configuration.
//!
//! Every field has a serde default, so a JSON file only needs to name the
//! values it overrides:
//!
//! ```json
//! {"fft_length": 1024, "norm": "db", "stretch": {"prob": 0.0, "max": 0.4}}
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which normalization is applied to the mel spectrogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormKind {
    /// Log-domain z-score per batch element.
    #[default]
    Whiten,
    /// Decibel scale, input treated as power.
    Db,
    /// Decibel scale, input treated as amplitude (squared first).
    AmplitudeDb,
    /// Leave the mel spectrogram as is.
    None,
}

impl NormKind {
    pub fn name(self) -> &'static str {
        match self {
            NormKind::Whiten => "whiten",
            NormKind::Db => "db",
            NormKind::AmplitudeDb => "amplitude_db",
            NormKind::None => "none",
        }
    }

    /// Parse a CLI-style name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "whiten" => Some(NormKind::Whiten),
            "db" => Some(NormKind::Db),
            "amplitude_db" => Some(NormKind::AmplitudeDb),
            "none" => Some(NormKind::None),
            _ => None,
        }
    }
}

/// Mel warping formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelScale {
    /// `2595 * log10(1 + f / 700)`
    Htk,
    /// Linear below 1 kHz, logarithmic above.
    #[default]
    Slaney,
}

/// Per-filter weight normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelNorm {
    /// Triangles peak at 1.
    #[default]
    None,
    /// Triangles scaled by `2 / (f_right - f_left)` (constant energy per band).
    Slaney,
}

/// Stochastic time-stretch parameters: `(stretch_prob, stretch_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StretchParams {
    /// Probability that a training-mode call is stretched.
    #[serde(default = "default_stretch")]
    pub prob: f64,
    /// Symmetric bound of the uniform draw; the rate is `1 - U[-max, max]`.
    #[serde(default = "default_stretch")]
    pub max: f64,
}

impl Default for StretchParams {
    fn default() -> Self {
        Self {
            prob: default_stretch(),
            max: default_stretch(),
        }
    }
}

/// Reference level subtracted in decibel mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbReference {
    /// Fixed power reference.
    Value(f64),
    /// The global maximum of the input.
    Max,
}

impl Default for DbReference {
    fn default() -> Self {
        DbReference::Value(1.0)
    }
}

/// Decibel-mode parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbParams {
    #[serde(default)]
    pub reference: DbReference,
    /// Floor applied before taking the logarithm. Must be > 0.
    #[serde(default = "default_amin")]
    pub amin: f64,
    /// Dynamic range below the maximum. `None` disables clamping.
    #[serde(default = "default_top_db")]
    pub top_db: Option<f64>,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            reference: DbReference::default(),
            amin: default_amin(),
            top_db: default_top_db(),
        }
    }
}

/// Whiten-mode parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhitenParams {
    /// Offset added before `log10`. Must be > 0.
    #[serde(default = "default_whiten_eps")]
    pub eps: f64,
    /// Floor for the per-element standard deviation. Constant inputs whiten to ~0.
    #[serde(default = "default_min_std")]
    pub min_std: f64,
}

impl Default for WhitenParams {
    fn default() -> Self {
        Self {
            eps: default_whiten_eps(),
            min_std: default_min_std(),
        }
    }
}

/// Top-level configuration of [`MelspectrogramStretch`](crate::pipeline::MelspectrogramStretch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelStretchConfig {
    // --- STFT ---
    #[serde(default = "default_fft_length")]
    pub fft_length: usize,
    /// `None` resolves to `fft_length / 4`.
    #[serde(default)]
    pub hop_length: Option<usize>,

    // --- Filterbank ---
    #[serde(default = "default_num_mels")]
    pub num_mels: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Lowest filter edge as a fraction of Nyquist.
    #[serde(default)]
    pub min_freq: f64,
    /// Highest filter edge as a fraction of Nyquist, in (0, 1].
    #[serde(default = "default_max_freq")]
    pub max_freq: f64,
    #[serde(default)]
    pub mel_scale: MelScale,
    #[serde(default)]
    pub mel_norm: MelNorm,

    // --- Complex norm ---
    #[serde(default = "default_power")]
    pub power: f64,

    // --- Normalization ---
    #[serde(default)]
    pub norm: NormKind,
    #[serde(default)]
    pub db: DbParams,
    #[serde(default)]
    pub whiten: WhitenParams,

    // --- Augmentation ---
    #[serde(default)]
    pub stretch: StretchParams,
}

impl Default for MelStretchConfig {
    fn default() -> Self {
        Self {
            fft_length: default_fft_length(),
            hop_length: None,
            num_mels: default_num_mels(),
            sample_rate: default_sample_rate(),
            min_freq: 0.0,
            max_freq: default_max_freq(),
            mel_scale: MelScale::default(),
            mel_norm: MelNorm::default(),
            power: default_power(),
            norm: NormKind::default(),
            db: DbParams::default(),
            whiten: WhitenParams::default(),
            stretch: StretchParams::default(),
        }
    }
}

impl MelStretchConfig {
    /// Load a JSON config file. The result is validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Hop length after applying the `fft_length / 4` default.
    pub fn hop_length(&self) -> usize {
        self.hop_length.unwrap_or((self.fft_length / 4).max(1))
    }

    /// Number of one-sided frequency bins.
    pub fn num_freqs(&self) -> usize {
        self.fft_length / 2 + 1
    }

    /// Reject every configuration the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.fft_length < 2 {
            return Err(Error::Config(format!(
                "fft_length must be at least 2, got {}",
                self.fft_length
            )));
        }
        if self.hop_length == Some(0) {
            return Err(Error::Config("hop_length must be positive".into()));
        }
        if self.num_mels == 0 {
            return Err(Error::Config("num_mels must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if !(self.max_freq > 0.0 && self.max_freq <= 1.0) {
            return Err(Error::Config(format!(
                "max_freq must be in (0, 1], got {}",
                self.max_freq
            )));
        }
        if !(self.min_freq >= 0.0 && self.min_freq < self.max_freq) {
            return Err(Error::Config(format!(
                "min_freq must be in [0, max_freq), got {}",
                self.min_freq
            )));
        }
        if !(self.power.is_finite() && self.power > 0.0) {
            return Err(Error::Config(format!(
                "power must be positive, got {}",
                self.power
            )));
        }
        if !(0.0..=1.0).contains(&self.stretch.prob) {
            return Err(Error::Config(format!(
                "stretch prob must be in [0, 1], got {}",
                self.stretch.prob
            )));
        }
        if !(self.stretch.max >= 0.0 && self.stretch.max < 1.0) {
            return Err(Error::Config(format!(
                "stretch max must be in [0, 1), got {}",
                self.stretch.max
            )));
        }
        Ok(())
    }
}

fn default_fft_length() -> usize {
    2048
}

fn default_num_mels() -> usize {
    128
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_max_freq() -> f64 {
    1.0
}

fn default_power() -> f64 {
    2.0
}

fn default_stretch() -> f64 {
    0.4
}

fn default_amin() -> f64 {
    1e-10
}

fn default_top_db() -> Option<f64> {
    Some(80.0)
}

fn default_whiten_eps() -> f64 {
    1.0
}

fn default_min_std() -> f64 {
    1e-5
}
