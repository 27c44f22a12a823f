//! Audio feature stages and WAV I/O.
//!
//! Stages, in pipeline order:
//!
//! - [`stft`] — centered STFT framing, frame-count law
//! - [`stretch`] — phase-vocoder time stretch and its stochastic policy
//! - [`complex_norm`] — complex → power/magnitude
//! - [`filterbank`] — mel filterbank construction and projection
//! - [`normalize`] — decibel scaling and whitening

pub mod complex_norm;
pub mod filterbank;
pub mod normalize;
pub mod stft;
pub mod stretch;
mod wav;

pub use wav::{pad_batch, peak_normalize, read_wav, to_mono, write_wav};
