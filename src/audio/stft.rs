//! Centered short-time Fourier transform over a waveform batch.
//!
//! - Window: periodic Hann, length `fft_length`
//! - Padding: reflect, `fft_length / 2` samples each side
//! - Output: one-sided, unnormalized, `[B, fft_length/2 + 1, T, 2]` (re, im)

use std::sync::Arc;

use candle_core::{DType, Tensor};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

use crate::{Error, Result};

/// Number of frames a centered STFT emits for `length` samples.
///
/// `(length + 2 * pad - fft_length + hop_length) / hop_length`, saturating at zero.
pub fn num_stft_bins(length: usize, fft_length: usize, hop_length: usize, pad: usize) -> usize {
    (length + 2 * pad + hop_length).saturating_sub(fft_length) / hop_length
}

/// STFT framer with a pre-planned FFT and window.
#[derive(Clone)]
pub struct Stft {
    fft_length: usize,
    hop_length: usize,
    window: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("fft_length", &self.fft_length)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

impl Stft {
    /// `hop_length = None` uses `fft_length / 4`.
    pub fn new(fft_length: usize, hop_length: Option<usize>) -> Result<Self> {
        if fft_length < 2 {
            return Err(Error::Config(format!(
                "fft_length must be at least 2, got {fft_length}"
            )));
        }
        let hop_length = hop_length.unwrap_or((fft_length / 4).max(1));
        if hop_length == 0 {
            return Err(Error::Config("hop_length must be positive".into()));
        }
        let fft = FftPlanner::new().plan_fft_forward(fft_length);
        Ok(Self {
            fft_length,
            hop_length,
            window: hann_window(fft_length),
            fft,
        })
    }

    pub fn fft_length(&self) -> usize {
        self.fft_length
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn pad(&self) -> usize {
        self.fft_length / 2
    }

    pub fn num_freqs(&self) -> usize {
        self.fft_length / 2 + 1
    }

    /// Frames emitted for a signal of `length` samples.
    pub fn num_frames(&self, length: usize) -> usize {
        num_stft_bins(length, self.fft_length, self.hop_length, self.pad())
    }

    /// Map valid lengths in samples to valid lengths in frames.
    pub fn lengths(&self, lengths: &[usize]) -> Vec<usize> {
        lengths.iter().map(|&l| self.num_frames(l)).collect()
    }

    /// `[B, L]` waveform → `[B, F, T, 2]` STFT.
    pub fn forward(&self, waveform: &Tensor) -> Result<Tensor> {
        if waveform.rank() != 2 {
            return Err(Error::shape(
                "waveform",
                "[batch, samples]",
                format!("{:?}", waveform.dims()),
            ));
        }
        let (batch, length) = waveform.dims2()?;
        let signals = waveform.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let num_freqs = self.num_freqs();

        let mut num_frames = self.num_frames(length);
        let mut data = Vec::with_capacity(batch * num_freqs * num_frames * 2);
        for signal in &signals {
            let padded = reflect_pad(signal, self.pad(), self.pad());
            let frames = self.frames(&padded);
            num_frames = frames.len();
            // Frame-major → frequency-major.
            for bin in 0..num_freqs {
                for frame in &frames {
                    data.push(frame[bin].re);
                    data.push(frame[bin].im);
                }
            }
        }

        Ok(Tensor::from_vec(
            data,
            (batch, num_freqs, num_frames, 2),
            waveform.device(),
        )?)
    }

    /// Windowed one-sided spectra of every full frame in `padded`.
    fn frames(&self, padded: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let n_fft = self.fft_length;
        let num_bins = self.num_freqs();
        let mut frames = Vec::new();
        let mut scratch = vec![Complex::default(); self.fft.get_inplace_scratch_len()];

        let mut start = 0;
        while start + n_fft <= padded.len() {
            let mut buffer: Vec<Complex<f32>> = padded[start..start + n_fft]
                .iter()
                .zip(&self.window)
                .map(|(&s, &w)| Complex::new(s * w, 0.0))
                .collect();
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            buffer.truncate(num_bins);
            frames.push(buffer);
            start += self.hop_length;
        }

        frames
    }
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / length as f64;
            (0.5 * (1.0 - phase.cos())) as f32
        })
        .collect()
}

/// Reflect-pad a signal on both sides, mirroring as often as needed.
fn reflect_pad(signal: &[f32], pad_left: usize, pad_right: usize) -> Vec<f32> {
    let len = signal.len();
    if len == 0 {
        return vec![0.0; pad_left + pad_right];
    }
    let mut padded = Vec::with_capacity(pad_left + len + pad_right);
    let at = |i: isize| signal[reflect_index(i, len)];

    padded.extend((-(pad_left as isize)..0).map(at));
    padded.extend_from_slice(signal);
    padded.extend((len as isize..(len + pad_right) as isize).map(at));
    padded
}

/// Index into `0..len` for position `i` of the infinitely reflected signal.
fn reflect_index(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let m = i.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, IndexOp};

    fn emitted_frames(stft: &Stft, length: usize) -> usize {
        let waveform = Tensor::zeros((1, length), DType::F32, &Device::Cpu).unwrap();
        stft.forward(&waveform).unwrap().dims4().unwrap().2
    }

    #[test]
    fn frame_count_matches_formula() {
        let configs = [(2048, 512), (512, 128), (400, 160), (256, 100), (64, 64), (7, 3)];
        for (fft_length, hop_length) in configs {
            let stft = Stft::new(fft_length, Some(hop_length)).unwrap();
            let lengths = [
                0,
                1,
                2,
                hop_length - 1,
                fft_length / 2,
                fft_length - 1,
                fft_length,
                fft_length + 1,
                3 * hop_length + 1,
                5 * fft_length + 17,
            ];
            for length in lengths {
                let expected = num_stft_bins(length, fft_length, hop_length, fft_length / 2);
                assert_eq!(
                    emitted_frames(&stft, length),
                    expected,
                    "fft={fft_length} hop={hop_length} len={length}"
                );
            }
        }
    }

    #[test]
    fn num_stft_bins_reference_values() {
        assert_eq!(num_stft_bins(16000, 2048, 512, 1024), 32);
        assert_eq!(num_stft_bins(8000, 2048, 512, 1024), 16);
        assert_eq!(num_stft_bins(0, 2048, 512, 1024), 1);
        // Odd FFT: the padded signal is one sample short of a frame.
        assert_eq!(num_stft_bins(0, 7, 3, 3), 0);
    }

    #[test]
    fn default_hop_is_quarter_fft() {
        let stft = Stft::new(2048, None).unwrap();
        assert_eq!(stft.hop_length(), 512);
        assert_eq!(stft.num_freqs(), 1025);
    }

    #[test]
    fn invalid_framer_rejected() {
        assert!(Stft::new(1, None).is_err());
        assert!(Stft::new(512, Some(0)).is_err());
    }

    #[test]
    fn lengths_use_frame_formula() {
        let stft = Stft::new(2048, Some(512)).unwrap();
        assert_eq!(stft.lengths(&[16000, 8000, 0]), vec![32, 16, 1]);
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let n_fft = 256;
        let bin = 16;
        let samples: Vec<f32> = (0..2048)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n_fft as f32).sin())
            .collect();
        let waveform = Tensor::from_vec(samples, (1, 2048), &Device::Cpu).unwrap();
        let stft = Stft::new(n_fft, None).unwrap();
        let spec = stft.forward(&waveform).unwrap();
        assert_eq!(spec.dims4().unwrap(), (1, 129, 33, 2));

        let power = spec.sqr().unwrap().sum(3).unwrap();
        let middle: Vec<f32> = power.i((0, .., 16)).unwrap().to_vec1().unwrap();
        let peak = middle
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
    }

    #[test]
    fn batch_elements_are_independent() {
        let a: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.05).sin()).collect();
        let mut both = a.clone();
        both.extend(vec![0.0; 1000]);
        let waveform = Tensor::from_vec(both, (2, 1000), &Device::Cpu).unwrap();
        let stft = Stft::new(128, None).unwrap();
        let spec = stft.forward(&waveform).unwrap();

        let silent: f32 = spec.i(1).unwrap().abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(silent, 0.0);

        let alone = stft
            .forward(&Tensor::from_vec(a, (1, 1000), &Device::Cpu).unwrap())
            .unwrap();
        let diff: f32 = (spec.i(0).unwrap() - alone.i(0).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn rejects_non_batched_input() {
        let waveform = Tensor::zeros(100, DType::F32, &Device::Cpu).unwrap();
        let stft = Stft::new(32, None).unwrap();
        assert!(matches!(
            stft.forward(&waveform),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reflect_pad_basic() {
        let signal = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let padded = reflect_pad(&signal, 2, 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn reflect_pad_longer_than_signal() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0], 5, 4);
        assert_eq!(
            padded,
            vec![2.0, 1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0]
        );
        assert_eq!(reflect_pad(&[7.0], 2, 1), vec![7.0; 4]);
        assert_eq!(reflect_pad(&[], 2, 2), vec![0.0; 4]);
    }

    #[test]
    fn hann_window_properties() {
        let w = hann_window(2048);
        assert_eq!(w.len(), 2048);
        assert!(w[0].abs() < 1e-7);
        assert!((w[1024] - 1.0).abs() < 1e-6);
        assert!((w[100] - w[2048 - 100]).abs() < 1e-6);
    }
}
