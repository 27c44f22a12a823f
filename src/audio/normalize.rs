//! Spectrogram normalization: decibel scaling and log-domain whitening.

use std::f64::consts::LN_10;

use candle_core::{D, DType, Tensor};

use crate::config::{DbParams, DbReference, NormKind, WhitenParams};
use crate::{Error, Result};

/// `10 * log10(x)` for a positive tensor.
fn ten_log10(x: &Tensor) -> Result<Tensor> {
    Ok((x.log()? * (10.0 / LN_10))?)
}

/// Largest element of the whole tensor.
fn global_max(x: &Tensor) -> Result<f64> {
    let max = x.flatten_all()?.max(0)?.to_dtype(DType::F64)?;
    Ok(max.to_scalar::<f64>()?)
}

fn check_db_params(params: &DbParams) -> Result<()> {
    if !(params.amin > 0.0) {
        return Err(Error::Config(format!(
            "amin must be strictly positive, got {}",
            params.amin
        )));
    }
    if let Some(top_db) = params.top_db
        && !(top_db >= 0.0)
    {
        return Err(Error::Config(format!(
            "top_db must be non-negative, got {top_db}"
        )));
    }
    if let DbReference::Value(v) = params.reference
        && !v.is_finite()
    {
        return Err(Error::Config(format!("db reference must be finite, got {v}")));
    }
    Ok(())
}

/// Power spectrogram → decibels.
///
/// `10 log10(max(x, amin)) - 10 log10(max(ref, amin))`, then clamped from
/// below at `max(output) - top_db` over the whole tensor.
pub fn power_to_db(spec: &Tensor, params: &DbParams) -> Result<Tensor> {
    check_db_params(params)?;
    let reference = match params.reference {
        DbReference::Value(v) => v,
        DbReference::Max => global_max(spec)?,
    };
    let ref_db = 10.0 * reference.max(params.amin).log10();
    let log_spec = (ten_log10(&spec.clamp(params.amin, f64::INFINITY)?)? - ref_db)?;

    match params.top_db {
        Some(top_db) => {
            let floor = global_max(&log_spec)? - top_db;
            Ok(log_spec.clamp(floor, f64::INFINITY)?)
        }
        None => Ok(log_spec),
    }
}

/// Amplitude spectrogram → decibels (squares, then [`power_to_db`]).
pub fn amplitude_to_db(spec: &Tensor, params: &DbParams) -> Result<Tensor> {
    power_to_db(&spec.sqr()?, params)
}

/// Per batch element: `(log10(x + eps) - mean) / std`.
///
/// Mean and (unbiased) standard deviation are taken over all non-batch
/// axes together, accumulated in f64. An element whose deviation is below
/// `min_std` (constant input, silence) whitens to exactly zero.
pub fn spec_whiten(spec: &Tensor, params: &WhitenParams) -> Result<Tensor> {
    let shape = spec.shape().clone();
    let batch = spec.dim(0)?;
    let lspec = ((spec.to_dtype(DType::F64)? + params.eps)?.log()? / LN_10)?;
    let lspec = lspec.reshape((batch, ()))?;
    let count = lspec.dim(1)?;

    let mean = lspec.mean_keepdim(D::Minus1)?;
    let centered = lspec.broadcast_sub(&mean)?;
    let var = (centered.sqr()?.sum_keepdim(D::Minus1)? / count.saturating_sub(1).max(1) as f64)?;
    let std = var.sqrt()?;
    let live = std.ge(params.min_std)?.to_dtype(DType::F64)?;
    let std = std.clamp(params.min_std, f64::INFINITY)?;

    let out = centered.broadcast_mul(&live)?.broadcast_div(&std)?;
    Ok(out.to_dtype(spec.dtype())?.reshape(shape)?)
}

/// The normalization stage, chosen once at construction.
#[derive(Debug, Clone, Copy)]
pub enum Normalizer {
    Whiten(WhitenParams),
    PowerDb(DbParams),
    AmplitudeDb(DbParams),
}

impl Normalizer {
    /// Build and validate the normalizer for `kind`; `NormKind::None` gives `None`.
    pub fn new(kind: NormKind, db: DbParams, whiten: WhitenParams) -> Result<Option<Self>> {
        let normalizer = match kind {
            NormKind::Whiten => {
                if !(whiten.eps > 0.0) {
                    return Err(Error::Config(format!(
                        "whiten eps must be positive, got {}",
                        whiten.eps
                    )));
                }
                if !(whiten.min_std > 0.0) {
                    return Err(Error::Config(format!(
                        "whiten min_std must be positive, got {}",
                        whiten.min_std
                    )));
                }
                Normalizer::Whiten(whiten)
            }
            NormKind::Db => {
                check_db_params(&db)?;
                Normalizer::PowerDb(db)
            }
            NormKind::AmplitudeDb => {
                check_db_params(&db)?;
                Normalizer::AmplitudeDb(db)
            }
            NormKind::None => return Ok(None),
        };
        Ok(Some(normalizer))
    }

    pub fn kind(&self) -> NormKind {
        match self {
            Normalizer::Whiten(_) => NormKind::Whiten,
            Normalizer::PowerDb(_) => NormKind::Db,
            Normalizer::AmplitudeDb(_) => NormKind::AmplitudeDb,
        }
    }

    pub fn forward(&self, spec: &Tensor) -> Result<Tensor> {
        match self {
            Normalizer::Whiten(params) => spec_whiten(spec, params),
            Normalizer::PowerDb(params) => power_to_db(spec, params),
            Normalizer::AmplitudeDb(params) => amplitude_to_db(spec, params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn values(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1().unwrap()
    }

    fn ramp_spec() -> Tensor {
        // Powers spanning 1e-12 .. 1e3.
        let data: Vec<f32> = (0..2 * 4 * 16)
            .map(|i| 10f32.powf(-12.0 + 15.0 * (i % 64) as f32 / 63.0))
            .collect();
        Tensor::from_vec(data, (2, 4, 16), &Device::Cpu).unwrap()
    }

    #[test]
    fn db_clamps_to_top_db() {
        let params = DbParams::default();
        let out = power_to_db(&ramp_spec(), &params).unwrap();
        let v = values(&out);
        let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!((max - 30.0).abs() < 1e-3, "max = {max}");
        for x in &v {
            assert!(*x >= max - 80.0 - 1e-4, "{x} below floor {}", max - 80.0);
            assert!(*x <= max);
        }
        let min = v.iter().cloned().fold(f32::INFINITY, f32::min);
        assert!((min - (max - 80.0)).abs() < 1e-3);
    }

    #[test]
    fn db_without_top_db_is_unclamped() {
        let params = DbParams {
            top_db: None,
            ..Default::default()
        };
        let v = values(&power_to_db(&ramp_spec(), &params).unwrap());
        let min = v.iter().cloned().fold(f32::INFINITY, f32::min);
        assert!((min + 100.0).abs() < 1e-2, "min = {min}");
    }

    #[test]
    fn db_reference_max_puts_peak_at_zero() {
        let params = DbParams {
            reference: DbReference::Max,
            ..Default::default()
        };
        let v = values(&power_to_db(&ramp_spec(), &params).unwrap());
        let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(max.abs() < 1e-3, "max = {max}");
    }

    #[test]
    fn db_silence_is_finite() {
        let silence = Tensor::zeros((1, 8, 4), DType::F32, &Device::Cpu).unwrap();
        let v = values(&power_to_db(&silence, &DbParams::default()).unwrap());
        for x in v {
            assert!((x + 100.0).abs() < 1e-3, "got {x}");
        }
    }

    #[test]
    fn amplitude_db_doubles_power_db() {
        let spec = Tensor::from_vec(vec![10.0f32, 100.0], (1, 1, 2), &Device::Cpu).unwrap();
        let params = DbParams {
            top_db: None,
            ..Default::default()
        };
        let v = values(&amplitude_to_db(&spec, &params).unwrap());
        assert!((v[0] - 20.0).abs() < 1e-4);
        assert!((v[1] - 40.0).abs() < 1e-4);
    }

    #[test]
    fn db_invalid_params_rejected() {
        let spec = ramp_spec();
        let bad_amin = DbParams {
            amin: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            power_to_db(&spec, &bad_amin),
            Err(Error::Config(_))
        ));
        let bad_top = DbParams {
            top_db: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(power_to_db(&spec, &bad_top), Err(Error::Config(_))));
        assert!(Normalizer::new(NormKind::Db, bad_top, WhitenParams::default()).is_err());
        assert!(Normalizer::new(NormKind::AmplitudeDb, bad_amin, WhitenParams::default()).is_err());
    }

    #[test]
    fn whiten_zero_mean_unit_std() {
        let out = spec_whiten(&ramp_spec(), &WhitenParams::default()).unwrap();
        assert_eq!(out.dims(), &[2, 4, 16]);
        for b in 0..2 {
            let v = values(&out.get(b).unwrap());
            let n = v.len() as f32;
            let mean = v.iter().sum::<f32>() / n;
            let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / (n - 1.0);
            assert!(mean.abs() < 1e-4, "mean = {mean}");
            assert!((var.sqrt() - 1.0).abs() < 1e-3, "std = {}", var.sqrt());
        }
    }

    #[test]
    fn whiten_batch_elements_independent() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 2, 2), &Device::Cpu).unwrap();
        let b = (&a * 1000.0).unwrap();
        let both = Tensor::cat(&[&a, &b], 0).unwrap();
        let params = WhitenParams::default();
        let alone = values(&spec_whiten(&a, &params).unwrap());
        let joint = values(&spec_whiten(&both, &params).unwrap().get(0).unwrap());
        for (x, y) in alone.iter().zip(&joint) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn whiten_constant_input_is_zero() {
        let params = WhitenParams::default();
        for value in [0.0f32, 3.0, 0.1, 1234.5, 7.7e6] {
            let constant = Tensor::full(value, (2, 128, 32), &Device::Cpu).unwrap();
            let out = spec_whiten(&constant, &params).unwrap();
            assert_eq!(out.dims(), &[2, 128, 32]);
            let max = values(&out).iter().fold(0.0f32, |m, x| m.max(x.abs()));
            assert_eq!(max, 0.0, "constant {value} did not whiten to zero");
        }
    }

    #[test]
    fn whiten_constant_element_beside_varying_one() {
        let constant = Tensor::full(3.0f32, (1, 128, 32), &Device::Cpu).unwrap();
        let ramp = Tensor::arange(0u32, 128 * 32, &Device::Cpu)
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap()
            .reshape((1, 128, 32))
            .unwrap();
        let both = Tensor::cat(&[&constant, &ramp], 0).unwrap();
        let out = spec_whiten(&both, &WhitenParams::default()).unwrap();
        assert!(values(&out.get(0).unwrap()).iter().all(|&x| x == 0.0));
        let v = values(&out.get(1).unwrap());
        let max = v.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        assert!(max > 1.0, "varying element should keep its spread, max |x| = {max}");
    }

    #[test]
    fn normalizer_dispatch() {
        let db = DbParams::default();
        let whiten = WhitenParams::default();
        assert!(Normalizer::new(NormKind::None, db, whiten).unwrap().is_none());
        for kind in [NormKind::Whiten, NormKind::Db, NormKind::AmplitudeDb] {
            let normalizer = Normalizer::new(kind, db, whiten).unwrap().unwrap();
            assert_eq!(normalizer.kind(), kind);
            let out = normalizer.forward(&ramp_spec()).unwrap();
            assert_eq!(out.dims(), &[2, 4, 16]);
        }
        let bad_whiten = WhitenParams {
            eps: 0.0,
            ..Default::default()
        };
        assert!(Normalizer::new(NormKind::Whiten, db, bad_whiten).is_err());
    }
}
