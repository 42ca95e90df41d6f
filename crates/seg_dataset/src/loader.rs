//! Split-aware batch loading with per-split cursors.
//!
//! Dataset layout on disk:
//! ```text
//! <root>/train/images/*.png   <root>/train/labels/*.png
//! <root>/test/images/*.png    <root>/test/labels/*.png
//! ```
//! Images and labels are paired by file stem. Labels are single-channel class
//! id maps; ids outside `0..n_classes` (usually 255) are ignored.

use crate::aug::TransformPipeline;
use crate::batch::SegBatch;
use crate::types::{DatasetError, DatasetResult, SampleIndex, SegSample, Split};
use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// What the training loop needs from a data source.
pub trait SegmentationLoader {
    fn n_classes(&self) -> usize;
    fn n_samples(&self, split: Split) -> usize;
    /// Next `size` samples from the split's cursor. The last batch of a pass
    /// may be smaller; a cursor at the end wraps to the start so a batch is
    /// never empty.
    fn next_batch(&mut self, size: usize, split: Split, augment: bool) -> DatasetResult<SegBatch>;
    /// Move the split's cursor back to its first sample.
    fn rewind(&mut self, split: Split);
    /// Reorder the training split and rewind it.
    fn shuffle_train(&mut self);
}

/// Random access to the samples of one split.
pub trait SampleStore {
    fn len(&self) -> usize;
    fn load(&self, index: usize) -> DatasetResult<SegSample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SampleStore for Vec<SegSample> {
    fn len(&self) -> usize {
        <[SegSample]>::len(self)
    }

    fn load(&self, index: usize) -> DatasetResult<SegSample> {
        self.get(index)
            .cloned()
            .ok_or_else(|| DatasetError::Other(format!("sample index {index} out of range")))
    }
}

/// One split of an on-disk dataset, decoded lazily and resized on load.
#[derive(Debug, Clone)]
pub struct FolderSplit {
    pub indices: Vec<SampleIndex>,
    pub width: u32,
    pub height: u32,
    pub channels: usize,
}

impl SampleStore for FolderSplit {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn load(&self, index: usize) -> DatasetResult<SegSample> {
        let idx = self
            .indices
            .get(index)
            .ok_or_else(|| DatasetError::Other(format!("sample index {index} out of range")))?;
        load_sample(idx, self.width, self.height, self.channels)
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub n_classes: usize,
    /// Target (width, height); every sample is resized to it on load.
    pub width: u32,
    pub height: u32,
    /// 1 (grayscale) or 3 (RGB).
    pub channels: usize,
    /// Fraction of the training split kept (0, 1].
    pub train_ratio: f64,
    /// Augmentations used when a training batch asks for them.
    pub augmentation: TransformPipeline,
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            n_classes: 6,
            width: 352,
            height: 224,
            channels: 3,
            train_ratio: 1.0,
            augmentation: TransformPipeline::segmentation(),
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
struct SplitCursor {
    order: Vec<usize>,
    cursor: usize,
}

impl SplitCursor {
    fn new(len: usize) -> Self {
        Self {
            order: (0..len).collect(),
            cursor: 0,
        }
    }

    fn take(&mut self, size: usize) -> &[usize] {
        if self.cursor >= self.order.len() {
            self.cursor = 0;
        }
        let start = self.cursor;
        let end = (start + size.max(1)).min(self.order.len());
        self.cursor = end;
        &self.order[start..end]
    }
}

pub struct Loader<S: SampleStore> {
    train: S,
    test: S,
    train_cursor: SplitCursor,
    test_cursor: SplitCursor,
    n_classes: usize,
    augmentation: TransformPipeline,
    rng: StdRng,
}

pub type FolderLoader = Loader<FolderSplit>;
pub type MemoryLoader = Loader<Vec<SegSample>>;

impl<S: SampleStore> Loader<S> {
    pub fn new(
        train: S,
        test: S,
        n_classes: usize,
        augmentation: TransformPipeline,
        seed: u64,
    ) -> Self {
        let train_cursor = SplitCursor::new(train.len());
        let test_cursor = SplitCursor::new(test.len());
        Self {
            train,
            test,
            train_cursor,
            test_cursor,
            n_classes,
            augmentation,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn augmentation(&self) -> &TransformPipeline {
        &self.augmentation
    }

    fn split_parts(&mut self, split: Split) -> (&S, &mut SplitCursor) {
        match split {
            Split::Train => (&self.train, &mut self.train_cursor),
            Split::Test => (&self.test, &mut self.test_cursor),
        }
    }
}

impl FolderLoader {
    pub fn from_root(root: &Path, cfg: &LoaderConfig) -> DatasetResult<Self> {
        if cfg.channels != 1 && cfg.channels != 3 {
            return Err(DatasetError::UnsupportedChannels(cfg.channels));
        }
        let mut train = index_split(&root.join(Split::Train.as_str()))?;
        let test = index_split(&root.join(Split::Test.as_str()))?;
        let keep = train_subset_len(train.len(), cfg.train_ratio);
        train.truncate(keep);
        tracing::info!(
            root = %root.display(),
            train = train.len(),
            test = test.len(),
            "indexed segmentation dataset"
        );
        let split = |indices| FolderSplit {
            indices,
            width: cfg.width,
            height: cfg.height,
            channels: cfg.channels,
        };
        Ok(Loader::new(
            split(train),
            split(test),
            cfg.n_classes,
            cfg.augmentation.clone(),
            cfg.seed,
        ))
    }
}

impl<S: SampleStore> SegmentationLoader for Loader<S> {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_samples(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train.len(),
            Split::Test => self.test.len(),
        }
    }

    fn next_batch(&mut self, size: usize, split: Split, augment: bool) -> DatasetResult<SegBatch> {
        let n_classes = self.n_classes;
        let (store, cursor) = self.split_parts(split);
        if store.is_empty() {
            return Err(DatasetError::EmptySplit { split });
        }
        let picked = cursor.take(size).to_vec();
        let mut samples = Vec::with_capacity(picked.len());
        for index in picked {
            samples.push(store.load(index)?);
        }
        if augment && split == Split::Train && !self.augmentation.is_identity() {
            samples = samples
                .into_iter()
                .map(|s| self.augmentation.apply(s, &mut self.rng))
                .collect();
        }
        SegBatch::from_samples(&samples, n_classes)
    }

    fn rewind(&mut self, split: Split) {
        self.split_parts(split).1.cursor = 0;
    }

    fn shuffle_train(&mut self) {
        self.train_cursor.order.shuffle(&mut self.rng);
        self.train_cursor.cursor = 0;
    }
}

/// Number of training samples kept for a ratio; never zero for a non-empty split.
pub fn train_subset_len(len: usize, ratio: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 1.0 };
    ((len as f64 * ratio).floor() as usize).clamp(1, len)
}

fn list_images(dir: &Path) -> DatasetResult<BTreeMap<String, PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut out = BTreeMap::new();
    for entry in entries {
        let path = entry
            .map_err(|source| DatasetError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            out.insert(stem.to_string(), path.clone());
        }
    }
    Ok(out)
}

/// Pair `images/` with `labels/` under a split directory, sorted by stem.
pub fn index_split(split_dir: &Path) -> DatasetResult<Vec<SampleIndex>> {
    let images = list_images(&split_dir.join("images"))?;
    let labels = list_images(&split_dir.join("labels"))?;
    images
        .into_iter()
        .map(|(stem, image_path)| match labels.get(&stem) {
            Some(label_path) => Ok(SampleIndex {
                image_path,
                label_path: label_path.clone(),
            }),
            None => Err(DatasetError::MissingLabel { image: image_path }),
        })
        .collect()
}

/// Decode one pair and resize it to `width x height`.
pub fn load_sample(
    idx: &SampleIndex,
    width: u32,
    height: u32,
    channels: usize,
) -> DatasetResult<SegSample> {
    let img = image::open(&idx.image_path).map_err(|source| DatasetError::Image {
        path: idx.image_path.clone(),
        source,
    })?;
    let label = image::open(&idx.label_path)
        .map_err(|source| DatasetError::Image {
            path: idx.label_path.clone(),
            source,
        })?
        .to_luma8();

    let image_chw = match channels {
        1 => {
            let gray = image::imageops::resize(&img.to_luma8(), width, height, FilterType::Triangle);
            gray.into_raw().into_iter().map(f32::from).collect()
        }
        3 => {
            let rgb = image::imageops::resize(&img.to_rgb8(), width, height, FilterType::Triangle);
            let plane = (width * height) as usize;
            let mut chw = vec![0.0f32; plane * 3];
            for (x, y, pixel) in rgb.enumerate_pixels() {
                let base = (y * width + x) as usize;
                chw[base] = pixel[0] as f32;
                chw[plane + base] = pixel[1] as f32;
                chw[2 * plane + base] = pixel[2] as f32;
            }
            chw
        }
        other => return Err(DatasetError::UnsupportedChannels(other)),
    };
    let label = image::imageops::resize(&label, width, height, FilterType::Nearest).into_raw();

    SegSample::new(width, height, channels, image_chw, label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(value: f32) -> SegSample {
        SegSample::new(1, 1, 1, vec![value], vec![0]).unwrap()
    }

    fn loader(n_train: usize) -> MemoryLoader {
        let train = (0..n_train).map(|i| tiny(i as f32)).collect();
        Loader::new(train, vec![tiny(99.0)], 2, TransformPipeline::identity(), 7)
    }

    #[test]
    fn last_batch_of_a_pass_is_partial() {
        let mut l = loader(5);
        assert_eq!(l.next_batch(2, Split::Train, false).unwrap().len(), 2);
        assert_eq!(l.next_batch(2, Split::Train, false).unwrap().len(), 2);
        assert_eq!(l.next_batch(2, Split::Train, false).unwrap().len(), 1);
    }

    #[test]
    fn exhausted_cursor_wraps_instead_of_returning_empty() {
        let mut l = loader(4);
        l.next_batch(2, Split::Train, false).unwrap();
        l.next_batch(2, Split::Train, false).unwrap();
        let wrapped = l.next_batch(2, Split::Train, false).unwrap();
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped.inputs, vec![0.0, 1.0]);
    }

    #[test]
    fn shuffle_keeps_every_sample_and_rewinds() {
        let mut l = loader(6);
        l.next_batch(4, Split::Train, false).unwrap();
        l.shuffle_train();
        let batch = l.next_batch(6, Split::Train, false).unwrap();
        let mut seen = batch.inputs.clone();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_split_is_an_error() {
        let mut l: MemoryLoader = Loader::new(vec![], vec![], 2, TransformPipeline::identity(), 0);
        assert!(matches!(
            l.next_batch(1, Split::Train, false),
            Err(DatasetError::EmptySplit { split: Split::Train })
        ));
    }

    #[test]
    fn train_ratio_keeps_at_least_one_sample() {
        assert_eq!(train_subset_len(10, 1.0), 10);
        assert_eq!(train_subset_len(10, 0.55), 5);
        assert_eq!(train_subset_len(10, 0.01), 1);
        assert_eq!(train_subset_len(0, 0.5), 0);
    }
}
