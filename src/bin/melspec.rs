//! melspec — mel-spectrogram feature extraction for WAV files.
//!
//! Loads one or more WAV files (downmixed to mono, zero-padded to a common
//! length), runs them through the feature pipeline as a single batch and
//! prints a one-line JSON summary to stdout:
//!
//! ```json
//! {"shape":[2,128,32],"lengths":[32,16],"stretch_rate":null}
//! ```
//!
//! With `--output`, the full feature tensor is also written as JSON
//! (`shape`, `lengths`, row-major `data`). `--save-clips` writes the
//! preprocessed mono clips back out as WAV for inspection.
//!
//! Exit code 0 on success, non-zero on error.

use std::path::PathBuf;

use clap::Parser;
use melstretch::audio::{pad_batch, peak_normalize, read_wav, to_mono, write_wav};
use melstretch::config::NormKind;
use melstretch::{MelStretchConfig, MelspectrogramStretch, Mode};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "melspec",
    about = "Normalized, optionally time-stretched mel spectrograms from WAV files",
    long_about = "Compute mel-spectrogram features for a batch of WAV files.\n\
                  Files are downmixed to mono and zero-padded to a common length.\n\
                  A JSON summary line is printed to stdout."
)]
struct Args {
    /// Input WAV files, processed as one batch.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON config file. Command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of mel bins.
    #[arg(long)]
    num_mels: Option<usize>,

    /// FFT size.
    #[arg(long)]
    fft_length: Option<usize>,

    /// Hop between frames (default: fft_length / 4).
    #[arg(long)]
    hop_length: Option<usize>,

    /// Normalization: whiten, db, amplitude_db or none.
    #[arg(long)]
    norm: Option<String>,

    /// Run in training mode (enables stochastic time stretch).
    #[arg(long, default_value_t = false)]
    train: bool,

    /// Random seed for the stretch draw. Omit for a random seed each run.
    #[arg(long, short = 's')]
    seed: Option<u64>,

    /// Peak-normalize each clip before feature extraction.
    #[arg(long, default_value_t = false)]
    peak_normalize: bool,

    /// Write each clip, as fed to the pipeline (mono, normalized), to this directory.
    #[arg(long)]
    save_clips: Option<PathBuf>,

    /// Write the full feature tensor to this JSON file.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Summary<'a> {
    shape: &'a [usize],
    lengths: &'a [usize],
    stretch_rate: Option<f64>,
}

#[derive(Serialize)]
struct FeatureDump<'a> {
    shape: &'a [usize],
    lengths: &'a [usize],
    data: Vec<f32>,
}

fn build_config(args: &Args) -> anyhow::Result<MelStretchConfig> {
    let mut config = match &args.config {
        Some(path) => MelStretchConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", path.display()))?,
        None => MelStretchConfig::default(),
    };
    if let Some(num_mels) = args.num_mels {
        config.num_mels = num_mels;
    }
    if let Some(fft_length) = args.fft_length {
        config.fft_length = fft_length;
    }
    if args.hop_length.is_some() {
        config.hop_length = args.hop_length;
    }
    if let Some(norm) = &args.norm {
        config.norm = NormKind::parse(norm).ok_or_else(|| {
            anyhow::anyhow!("unknown norm '{norm}'. Use whiten, db, amplitude_db or none")
        })?;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let mut clips = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let (samples, sample_rate, channels) = read_wav(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        if sample_rate != config.sample_rate {
            tracing::warn!(
                "{}: sample rate {} Hz differs from configured {} Hz",
                path.display(),
                sample_rate,
                config.sample_rate
            );
        }
        let mut mono = to_mono(&samples, channels)?;
        if args.peak_normalize {
            peak_normalize(&mut mono);
        }
        tracing::info!("{}: {} samples", path.display(), mono.len());
        if let Some(dir) = &args.save_clips {
            std::fs::create_dir_all(dir)?;
            let name = path.file_name().unwrap_or(path.as_os_str());
            let clip_path = dir.join(name).with_extension("wav");
            write_wav(&clip_path, &mono, sample_rate, 1)?;
            tracing::debug!("Saved clip to {}", clip_path.display());
        }
        clips.push(mono);
    }

    let device = candle_core::Device::cuda_if_available(0)?;
    tracing::info!("Using device: {:?}", device);

    let (waveform, lengths) = pad_batch(&clips, &device)?;
    let pipeline = MelspectrogramStretch::new(config, &device)?;
    tracing::info!("{pipeline}");

    let mode = if args.train {
        Mode::Training
    } else {
        Mode::Inference
    };
    let mut rng = match args.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };

    let features = pipeline
        .forward(&waveform, Some(&lengths), mode, &mut rng)
        .map_err(|e| anyhow::anyhow!("feature extraction failed: {e}"))?;
    let frame_lengths = features.lengths.unwrap_or_default();

    if let Some(output) = &args.output {
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let dump = FeatureDump {
            shape: features.mel.dims(),
            lengths: &frame_lengths,
            data: features.mel.flatten_all()?.to_vec1::<f32>()?,
        };
        std::fs::write(output, serde_json::to_string(&dump)?)?;
        tracing::info!("Wrote features to {}", output.display());
    }

    // Machine-readable summary for the caller.
    let summary = Summary {
        shape: features.mel.dims(),
        lengths: &frame_lengths,
        stretch_rate: features.stretch_rate,
    };
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}
