//! A batched tensor paired with optional per-element valid lengths.
//!
//! Stages that change the time axis transform the lengths alongside the
//! tensor; every other stage passes them through untouched.

use candle_core::Tensor;

use crate::Result;

/// Tensor plus optional valid-length vector (one entry per batch element).
#[derive(Debug, Clone)]
pub struct Batch {
    pub data: Tensor,
    pub lengths: Option<Vec<usize>>,
}

impl Batch {
    pub fn new(data: Tensor, lengths: Option<Vec<usize>>) -> Self {
        Self { data, lengths }
    }

    /// Replace the tensor, keeping the lengths.
    pub fn map<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        Ok(Self {
            data: f(&self.data)?,
            lengths: self.lengths,
        })
    }

    /// Replace the tensor and transform the lengths (if present).
    pub fn map_with_lengths<F, L>(self, f: F, lengths: L) -> Result<Self>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
        L: FnOnce(&[usize]) -> Vec<usize>,
    {
        Ok(Self {
            data: f(&self.data)?,
            lengths: self.lengths.as_deref().map(lengths),
        })
    }

    pub fn into_parts(self) -> (Tensor, Option<Vec<usize>>) {
        (self.data, self.lengths)
    }
}
