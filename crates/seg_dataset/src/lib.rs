//! Dataset loading, augmentation, and Burn-compatible batching for segmentation.
//!
//! This crate provides:
//! - Indexing of `images/` + `labels/` split folders
//! - Per-split cursors with shuffling and a training-sample ratio
//! - Label-safe augmentation (flip, scale jitter, photometric jitter)
//! - Input preprocessing modes
//! - Conversion of host batches into `(input, one-hot label, mask)` tensors

pub mod aug;
pub mod batch;
pub mod loader;
pub mod preprocess;
pub mod types;

pub use aug::{TransformPipeline, TransformPipelineBuilder};
pub use batch::{SegBatch, SegTensors};
pub use loader::{
    index_split, load_sample, train_subset_len, FolderLoader, FolderSplit, Loader, LoaderConfig,
    MemoryLoader, SampleStore, SegmentationLoader,
};
pub use preprocess::PreprocessMode;
pub use types::*;
