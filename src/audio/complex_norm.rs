//! Complex STFT → real spectrogram: `|z|^p`.

use candle_core::{D, Tensor};

use crate::{Error, Result};

/// Reduces a `[.., 2]` (re, im) tensor to `|z|^power`, dropping the last axis.
#[derive(Debug, Clone, Copy)]
pub struct ComplexNorm {
    power: f64,
}

impl ComplexNorm {
    pub fn new(power: f64) -> Result<Self> {
        if !(power.is_finite() && power > 0.0) {
            return Err(Error::Config(format!(
                "complex norm power must be positive, got {power}"
            )));
        }
        Ok(Self { power })
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn forward(&self, stft: &Tensor) -> Result<Tensor> {
        let last = stft.dims().last().copied();
        if last != Some(2) {
            return Err(Error::shape(
                "complex stft",
                "trailing axis of size 2",
                format!("{:?}", stft.dims()),
            ));
        }
        // re² + im², no square root on the power path.
        let power = stft.sqr()?.sum(D::Minus1)?;
        let out = if self.power == 2.0 {
            power
        } else if self.power == 1.0 {
            power.sqrt()?
        } else {
            power.powf(self.power / 2.0)?
        };
        Ok(out)
    }
}

impl Default for ComplexNorm {
    fn default() -> Self {
        Self { power: 2.0 }
    }
}
