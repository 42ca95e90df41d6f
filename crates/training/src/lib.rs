#![recursion_limit = "256"]

pub mod checkpoint;
pub mod history;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use checkpoint::{
    restore_or_init, BestTracker, CheckpointMeta, CheckpointSaver, FileCheckpoint, BEST_CHECKPOINT,
};
pub use history::{RunHistory, StepLosses};
pub use metrics::{evaluate, infer_scores, ConfusionMatrix, EvalOptions, SegMetrics};
pub use models::{SegNet, SegNetConfig, Segmenter};
pub use schedule::{lr_decay, LearningRate};
pub use trainer::{steps_per_epoch, train, TrainOptions};
pub use util::{run_eval, run_train, EvalArgs, TrainArgs};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
