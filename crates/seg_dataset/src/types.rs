//! Core types, error definitions, and data structures for seg_dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Label value marking pixels that carry no supervision.
pub const IGNORE_LABEL: u8 = 255;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no label found for image {image}")]
    MissingLabel { image: PathBuf },
    #[error("{split} split is empty")]
    EmptySplit { split: Split },
    #[error("unsupported channel count {0}; expected 1 or 3")]
    UnsupportedChannels(usize),
    #[error("sample is {actual:?} but batch expects {expected:?} (width, height, channels)")]
    ShapeMismatch {
        expected: (u32, u32, usize),
        actual: (u32, u32, usize),
    },
    #[error("{0}")]
    Other(String),
}

/// Which half of the dataset a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded sample, resized to the loader's target size.
#[derive(Debug, Clone)]
pub struct SegSample {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    /// Raw intensities (0..=255) in CHW layout.
    pub image_chw: Vec<f32>,
    /// Per-pixel class ids in HW layout; `IGNORE_LABEL` (or any id outside
    /// the class range) is masked out of the loss.
    pub label: Vec<u8>,
}

impl SegSample {
    pub fn new(
        width: u32,
        height: u32,
        channels: usize,
        image_chw: Vec<f32>,
        label: Vec<u8>,
    ) -> DatasetResult<Self> {
        let pixels = (width * height) as usize;
        if image_chw.len() != pixels * channels || label.len() != pixels {
            return Err(DatasetError::Other(format!(
                "sample buffers do not match {width}x{height}x{channels}: image={} label={}",
                image_chw.len(),
                label.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            image_chw,
            label,
        })
    }

    pub fn shape(&self) -> (u32, u32, usize) {
        (self.width, self.height, self.channels)
    }
}

/// Image/label pair on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}
