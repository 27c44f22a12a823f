//! Mel-spectrogram features with optional time-stretch augmentation.
//!
//! A candle-based feature extractor for variable-length audio batches. It
//! turns a zero-padded waveform batch into a normalized mel spectrogram and
//! keeps the per-element valid lengths consistent with the time axis.
//!
//! ## Pipeline
//!
//! ```text
//! waveform [B, L] ─→ STFT ─→ (time stretch, training only) ─→ |z|^p
//!                              ─→ mel filterbank ─→ whiten | dB ─→ [B, M, T]
//! lengths (samples) ─→ frames ─→ floor(len / r) + 1 ──────────────→ lengths
//! ```
//!
//! ## Modules
//!
//! - [`audio`] — STFT, phase vocoder, complex norm, filterbank, normalization, WAV I/O
//! - [`batch`] — tensor paired with optional valid lengths
//! - [`config`] — serde-backed pipeline configuration
//! - [`pipeline`] — the end-to-end [`MelspectrogramStretch`] extractor

pub mod audio;
pub mod batch;
pub mod config;
pub mod pipeline;

mod error;

pub use audio::stretch::Mode;
pub use config::MelStretchConfig;
pub use error::{Error, Result};
pub use pipeline::{Features, MelspectrogramStretch};
