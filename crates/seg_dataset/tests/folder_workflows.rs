//! End-to-end checks for on-disk datasets: index → load → batch → tensors.

use burn_ndarray::NdArray;
use image::{GrayImage, Luma, Rgb, RgbImage};
use seg_dataset::{
    index_split, DatasetError, FolderLoader, LoaderConfig, PreprocessMode, SegmentationLoader,
    Split, TransformPipeline, IGNORE_LABEL,
};
use std::fs;
use std::path::Path;

type Backend = NdArray<f32>;

/// Writes `count` 8x4 RGB images with labels whose left half is class `i % 3`
/// and right half is ignored.
fn create_split(root: &Path, split: &str, count: usize) -> anyhow::Result<()> {
    let images = root.join(split).join("images");
    let labels = root.join(split).join("labels");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&labels)?;
    for i in 0..count {
        let name = format!("frame_{i:05}.png");
        let img = RgbImage::from_pixel(8, 4, Rgb([(i * 20) as u8, 128, 255]));
        img.save(images.join(&name))?;
        let label = GrayImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                Luma([(i % 3) as u8])
            } else {
                Luma([IGNORE_LABEL])
            }
        });
        label.save(labels.join(&name))?;
    }
    Ok(())
}

fn config() -> LoaderConfig {
    LoaderConfig {
        n_classes: 3,
        width: 8,
        height: 4,
        channels: 3,
        train_ratio: 1.0,
        augmentation: TransformPipeline::identity(),
        seed: 7,
    }
}

#[test]
fn folder_loader_batches_into_tensors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "train", 5)?;
    create_split(tmp.path(), "test", 2)?;

    let mut loader = FolderLoader::from_root(tmp.path(), &config())?;
    assert_eq!(loader.n_samples(Split::Train), 5);
    assert_eq!(loader.n_samples(Split::Test), 2);
    assert_eq!(loader.n_classes(), 3);

    let mut batch = loader.next_batch(4, Split::Train, false)?;
    assert_eq!(batch.len(), 4);
    batch.preprocess(PreprocessMode::Normalize);
    assert!(batch.inputs.iter().all(|v| (-1.0..=1.0).contains(v)));

    let device = Default::default();
    let tensors = batch.into_tensors::<Backend>(&device);
    assert_eq!(tensors.input.dims(), [4, 3, 4, 8]);
    assert_eq!(tensors.label.dims(), [4, 3, 4, 8]);
    assert_eq!(tensors.mask.dims(), [4, 4, 8]);

    // Half of every image is ignored.
    let valid: f32 = tensors.mask.sum().into_data().to_vec::<f32>().unwrap()[0];
    assert_eq!(valid, (4 * 4 * 4) as f32);

    let tail = loader.next_batch(4, Split::Train, false)?;
    assert_eq!(tail.len(), 1);
    Ok(())
}

#[test]
fn images_are_resized_to_the_target() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "train", 1)?;
    create_split(tmp.path(), "test", 1)?;

    let cfg = LoaderConfig {
        width: 4,
        height: 2,
        channels: 1,
        ..config()
    };
    let mut loader = FolderLoader::from_root(tmp.path(), &cfg)?;
    let batch = loader.next_batch(1, Split::Test, false)?;
    assert_eq!((batch.width, batch.height, batch.channels), (4, 2, 1));
    assert_eq!(batch.classes.len(), 8);
    Ok(())
}

#[test]
fn train_ratio_trims_the_training_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "train", 10)?;
    create_split(tmp.path(), "test", 1)?;

    let cfg = LoaderConfig {
        train_ratio: 0.5,
        ..config()
    };
    let loader = FolderLoader::from_root(tmp.path(), &cfg)?;
    assert_eq!(loader.n_samples(Split::Train), 5);
    assert_eq!(loader.n_samples(Split::Test), 1);
    Ok(())
}

#[test]
fn image_without_label_is_reported() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "train", 2)?;
    fs::remove_file(tmp.path().join("train/labels/frame_00001.png"))?;

    let err = index_split(&tmp.path().join("train")).unwrap_err();
    assert!(matches!(err, DatasetError::MissingLabel { .. }));
    Ok(())
}
