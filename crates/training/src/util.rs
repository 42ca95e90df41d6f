use anyhow::Context;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use clap::{Parser, ValueEnum};
use models::SegNetConfig;
use seg_dataset::{
    FolderLoader, LoaderConfig, PreprocessMode, SegmentationLoader, Split, TransformPipeline,
};
use std::fs;
use std::path::PathBuf;

use crate::checkpoint::{restore_or_init, FileCheckpoint, BEST_CHECKPOINT};
use crate::metrics::{evaluate, EvalOptions, SegMetrics};
use crate::schedule::{LearningRate, END_LEARNING_RATE};
use crate::trainer::{train, TrainOptions};
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

/// Samples scored by the final test-time-augmented pass.
pub const FINAL_EVAL_SAMPLES: usize = 5;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "train", about = "Train the segmentation network on a folder dataset")]
pub struct TrainArgs {
    /// Dataset root containing train/ and test/ splits.
    #[arg(long, default_value = "dataset")]
    pub dataset: PathBuf,
    /// Directory holding the best checkpoint.
    #[arg(long, default_value = "weights/model")]
    pub model_path: PathBuf,
    #[arg(long, default_value_t = 6)]
    pub n_classes: usize,
    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 500)]
    pub epochs: usize,
    /// Input width after resizing.
    #[arg(long, default_value_t = 352)]
    pub width: u32,
    /// Input height after resizing.
    #[arg(long, default_value_t = 224)]
    pub height: u32,
    /// Initial learning rate.
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,
    /// Accelerator index (wgpu builds only).
    #[arg(long, env = "SEGTRAIN_DEVICE", default_value_t = 0)]
    pub n_gpu: usize,
    /// Fraction of the training split to use.
    #[arg(long, default_value_t = 1.0)]
    pub r_samples: f64,
    /// Image channels (1 or 3).
    #[arg(long, default_value_t = 3)]
    pub channels: usize,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Cap on test samples scored after each epoch.
    #[arg(long, default_value_t = 250)]
    pub max_eval_samples: usize,
    /// Where the `<timestamp>_{train,test}.txt` tables go.
    #[arg(long, default_value = ".")]
    pub history_dir: PathBuf,
    #[arg(long, value_enum, default_value_t = PreprocessMode::None)]
    pub preprocess: PreprocessMode,
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
    /// Disable per-step loss logging.
    #[arg(long)]
    pub quiet: bool,
    /// Write colourised predictions of the final pass to `<dataset>/images_out`.
    #[arg(long)]
    pub write_images: bool,
}

impl TrainArgs {
    fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            n_classes: self.n_classes,
            width: self.width,
            height: self.height,
            channels: self.channels,
            train_ratio: self.r_samples,
            augmentation: TransformPipeline::segmentation(),
            seed: self.seed,
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            epochs: self.epochs,
            batch_size: self.batch_size.max(1),
            augment: true,
            init_lr: self.lr,
            end_lr: END_LEARNING_RATE,
            evaluate: true,
            best_checkpoint: BEST_CHECKPOINT.to_string(),
            preprocess: self.preprocess,
            max_eval_samples: Some(self.max_eval_samples),
            show_loss: !self.quiet,
            history_dir: Some(self.history_dir.clone()),
        }
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<SegMetrics> {
    validate_backend_choice(args.backend)?;
    let device = select_device(args.n_gpu);

    let mut loader = FolderLoader::from_root(&args.dataset, &args.loader_config())
        .with_context(|| format!("failed to open dataset {}", args.dataset.display()))?;
    tracing::info!(augmentation = %loader.augmentation().describe(), "training augmentation");

    fs::create_dir_all(&args.model_path).with_context(|| {
        format!("failed to create model dir {}", args.model_path.display())
    })?;
    let mut saver = FileCheckpoint::new(&args.model_path);
    let model = SegNetConfig::new(args.channels, args.n_classes).init::<ADBackend>(&device);
    let (mut model, _) = restore_or_init(model, &saver.stem(BEST_CHECKPOINT), &device)?;

    if args.epochs > 0 {
        let mut optim = AdamConfig::new().init();
        let mut lr = LearningRate::new(args.lr);
        let (trained, history) = train(
            &mut loader,
            model,
            &mut optim,
            &mut lr,
            &mut saver,
            &args.train_options(),
            &device,
        )?;
        tracing::info!(
            steps = history.train_rows(),
            best_miou = history.best_miou().unwrap_or(0.0),
            "training finished"
        );
        model = trained;
    }

    loader.shuffle_train();
    let mut eval_opts =
        EvalOptions::test_time_augmented(Split::Train, args.preprocess, Some(FINAL_EVAL_SAMPLES));
    if args.write_images {
        eval_opts.write_images = Some(args.dataset.join("images_out"));
    }
    let metrics = evaluate(&mut loader, &model.valid(), &eval_opts, &device)?;
    println!("Test accuracy: {:.4}", metrics.accuracy);
    println!("Test miou: {:.4}", metrics.miou);
    Ok(metrics)
}

#[derive(Parser, Debug, Clone)]
#[command(name = "eval", about = "Score a segmentation checkpoint (accuracy / mean-IoU)")]
pub struct EvalArgs {
    #[arg(long, default_value = "dataset")]
    pub dataset: PathBuf,
    /// Directory holding the checkpoint.
    #[arg(long, default_value = "weights/model")]
    pub model_path: PathBuf,
    #[arg(long, default_value = BEST_CHECKPOINT)]
    pub checkpoint: String,
    #[arg(long, default_value_t = 6)]
    pub n_classes: usize,
    #[arg(long, default_value_t = 352)]
    pub width: u32,
    #[arg(long, default_value_t = 224)]
    pub height: u32,
    #[arg(long, default_value_t = 3)]
    pub channels: usize,
    #[arg(long, value_enum, default_value_t = Split::Test)]
    pub split: Split,
    /// Comma-separated input scales.
    #[arg(long, value_delimiter = ',', default_value = "1.0")]
    pub scales: Vec<f32>,
    /// Average with horizontally flipped inference.
    #[arg(long)]
    pub flip: bool,
    #[arg(long)]
    pub max_samples: Option<usize>,
    #[arg(long, value_enum, default_value_t = PreprocessMode::None)]
    pub preprocess: PreprocessMode,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[arg(long, env = "SEGTRAIN_DEVICE", default_value_t = 0)]
    pub n_gpu: usize,
    /// Directory for colourised predictions.
    #[arg(long)]
    pub write_images: Option<PathBuf>,
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<SegMetrics> {
    validate_backend_choice(args.backend)?;
    let device = select_device(args.n_gpu);

    let cfg = LoaderConfig {
        n_classes: args.n_classes,
        width: args.width,
        height: args.height,
        channels: args.channels,
        augmentation: TransformPipeline::identity(),
        ..Default::default()
    };
    let mut loader = FolderLoader::from_root(&args.dataset, &cfg)
        .with_context(|| format!("failed to open dataset {}", args.dataset.display()))?;
    if loader.n_samples(args.split) == 0 {
        anyhow::bail!("{} split of {} is empty", args.split, args.dataset.display());
    }

    let stem = FileCheckpoint::new(&args.model_path).stem(&args.checkpoint);
    let model = SegNetConfig::new(args.channels, args.n_classes).init::<TrainBackend>(&device);
    let (model, restored) = restore_or_init(model, &stem, &device)?;
    if !restored {
        println!("No checkpoint at {}; scoring an untrained model", stem.display());
    }

    let opts = EvalOptions {
        split: args.split,
        flip: args.flip,
        scales: args.scales.clone(),
        preprocess: args.preprocess,
        max_samples: args.max_samples,
        write_images: args.write_images.clone(),
    };
    let metrics = evaluate(&mut loader, &model, &opts, &device)?;
    println!(
        "{} accuracy={:.4} miou={:.4}",
        args.split, metrics.accuracy, metrics.miou
    );
    Ok(metrics)
}

#[cfg(feature = "backend-wgpu")]
pub fn select_device(index: usize) -> <TrainBackend as burn::tensor::backend::Backend>::Device {
    burn_wgpu::WgpuDevice::DiscreteGpu(index)
}

#[cfg(not(feature = "backend-wgpu"))]
pub fn select_device(index: usize) -> <TrainBackend as burn::tensor::backend::Backend>::Device {
    if index != 0 {
        tracing::warn!(index, "device index ignored on the ndarray backend");
    }
    Default::default()
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; running on WGPU despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_cli() {
        let args = TrainArgs::parse_from(["train"]);
        assert_eq!(args.dataset, PathBuf::from("dataset"));
        assert_eq!(args.model_path, PathBuf::from("weights/model"));
        assert_eq!(args.n_classes, 6);
        assert_eq!(args.batch_size, 8);
        assert_eq!(args.epochs, 500);
        assert_eq!((args.width, args.height), (352, 224));
        assert_eq!(args.lr, 1e-4);
        assert_eq!(args.r_samples, 1.0);
        assert_eq!(args.max_eval_samples, 250);
        assert_eq!(args.preprocess, PreprocessMode::None);
    }

    #[test]
    fn zero_batch_size_is_clamped_in_options() {
        let args = TrainArgs::parse_from(["train", "--batch-size", "0", "--quiet"]);
        let opts = args.train_options();
        assert_eq!(opts.batch_size, 1);
        assert!(!opts.show_loss);
        assert_eq!(opts.best_checkpoint, "best");
    }

    #[test]
    fn eval_scales_are_comma_separated() {
        let args = EvalArgs::parse_from(["eval", "--scales", "0.75,1,1.5", "--split", "train"]);
        assert_eq!(args.scales, vec![0.75, 1.0, 1.5]);
        assert_eq!(args.split, Split::Train);
    }

    #[cfg(not(feature = "backend-wgpu"))]
    #[test]
    fn wgpu_requires_the_feature() {
        assert!(validate_backend_choice(BackendKind::Wgpu).is_err());
        assert!(validate_backend_choice(BackendKind::NdArray).is_ok());
    }
}
