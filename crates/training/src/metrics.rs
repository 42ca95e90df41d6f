//! Pixel accuracy and mean-IoU over a split, with optional test-time augmentation.

use anyhow::Context;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;
use models::Segmenter;
use seg_dataset::{PreprocessMode, SegmentationLoader, Split};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegMetrics {
    pub accuracy: f64,
    pub miou: f64,
}

/// Square confusion matrix indexed `[label][prediction]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    n_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, label: usize, prediction: usize) {
        if label < self.n_classes && prediction < self.n_classes {
            self.counts[label * self.n_classes + prediction] += 1;
        }
    }

    pub fn get(&self, label: usize, prediction: usize) -> u64 {
        self.counts[label * self.n_classes + prediction]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.n_classes).map(|c| self.get(c, c)).sum();
        correct as f64 / total as f64
    }

    /// Per-class IoU; a class absent from both labels and predictions scores 0.
    pub fn per_class_iou(&self) -> Vec<f64> {
        (0..self.n_classes)
            .map(|c| {
                let intersection = self.get(c, c);
                let labelled: u64 = (0..self.n_classes).map(|p| self.get(c, p)).sum();
                let predicted: u64 = (0..self.n_classes).map(|l| self.get(l, c)).sum();
                let union = labelled + predicted - intersection;
                if union == 0 {
                    0.0
                } else {
                    intersection as f64 / union as f64
                }
            })
            .collect()
    }

    pub fn mean_iou(&self) -> f64 {
        let ious = self.per_class_iou();
        if ious.is_empty() {
            return 0.0;
        }
        ious.iter().sum::<f64>() / ious.len() as f64
    }

    pub fn metrics(&self) -> SegMetrics {
        SegMetrics {
            accuracy: self.accuracy(),
            miou: self.mean_iou(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub split: Split,
    /// Average scores of the flipped input with the plain pass.
    pub flip: bool,
    /// Input scales; each is inferred and resized back before averaging.
    pub scales: Vec<f32>,
    pub preprocess: PreprocessMode,
    /// Cap on evaluated samples; `None` evaluates the whole split.
    pub max_samples: Option<usize>,
    /// Directory for colourised predictions; `None` writes nothing.
    pub write_images: Option<PathBuf>,
}

impl EvalOptions {
    /// Single scale, no flip: the per-epoch validation pass.
    pub fn validation(preprocess: PreprocessMode, max_samples: Option<usize>) -> Self {
        Self {
            split: Split::Test,
            flip: false,
            scales: vec![1.0],
            preprocess,
            max_samples,
            write_images: None,
        }
    }

    /// Flip averaging over scales {0.75, 1, 1.5}.
    pub fn test_time_augmented(
        split: Split,
        preprocess: PreprocessMode,
        max_samples: Option<usize>,
    ) -> Self {
        Self {
            split,
            flip: true,
            scales: vec![0.75, 1.0, 1.5],
            preprocess,
            max_samples,
            write_images: None,
        }
    }
}

/// Summed class probabilities over all scales (and flips) at input resolution.
pub fn infer_scores<B: Backend, M: Segmenter<B>>(
    model: &M,
    input: Tensor<B, 4>,
    flip: bool,
    scales: &[f32],
) -> Tensor<B, 4> {
    let [b, _, h, w] = input.dims();
    let device = input.device();
    let mut scores = Tensor::<B, 4>::zeros([b, model.num_classes(), h, w], &device);
    for &scale in scales {
        let sh = ((h as f32 * scale).round() as usize).max(1);
        let sw = ((w as f32 * scale).round() as usize).max(1);
        let scaled = bilinear(input.clone(), [sh, sw]);

        let logits = bilinear(model.segment(scaled.clone()), [h, w]);
        scores = scores + softmax(logits, 1);

        if flip {
            let flipped = model.segment(scaled.flip([3])).flip([3]);
            scores = scores + softmax(bilinear(flipped, [h, w]), 1);
        }
    }
    scores
}

fn bilinear<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if [h, w] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Bilinear))
}

/// Arg-max over the class axis of `[B, K, H, W]` host scores.
fn argmax_classes(scores: &[f32], batch: usize, classes: usize, plane: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(batch * plane);
    for b in 0..batch {
        for p in 0..plane {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..classes {
                let s = scores[(b * classes + c) * plane + p];
                if s > best_score {
                    best_score = s;
                    best = c;
                }
            }
            out.push(best);
        }
    }
    out
}

/// Evaluates `model` one sample at a time over the configured split.
///
/// The split cursor is rewound first so every call sees the same samples.
pub fn evaluate<B, M, L>(
    loader: &mut L,
    model: &M,
    opts: &EvalOptions,
    device: &B::Device,
) -> anyhow::Result<SegMetrics>
where
    B: Backend,
    M: Segmenter<B>,
    L: SegmentationLoader,
{
    let n_classes = loader.n_classes();
    let available = loader.n_samples(opts.split);
    let samples = opts
        .max_samples
        .map_or(available, |cap| cap.min(available));

    loader.rewind(opts.split);
    let mut confusion = ConfusionMatrix::new(n_classes);
    for step in 0..samples {
        let mut batch = loader
            .next_batch(1, opts.split, false)
            .with_context(|| format!("failed to load {} sample {step}", opts.split))?;
        batch.preprocess(opts.preprocess);
        let classes = batch.classes.clone();
        let (height, width) = (batch.height, batch.width);
        let tensors = batch.into_tensors::<B>(device);

        let scores = infer_scores(model, tensors.input, opts.flip, &opts.scales);
        let host = scores
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read scores: {e:?}"))?;
        let predictions = argmax_classes(&host, 1, n_classes, height * width);

        for (label, prediction) in classes.iter().zip(&predictions) {
            if (*label as usize) < n_classes {
                confusion.add(*label as usize, *prediction);
            }
        }

        if let Some(dir) = &opts.write_images {
            let path = dir.join(format!("{}_{step:05}.png", opts.split));
            write_prediction_image(&path, &predictions, width as u32, height as u32)?;
        }
    }

    let metrics = confusion.metrics();
    tracing::debug!(per_class_iou = ?confusion.per_class_iou(), "evaluated {samples} samples");
    Ok(metrics)
}

const PALETTE: [[u8; 3]; 8] = [
    [128, 64, 128],
    [70, 70, 70],
    [220, 220, 0],
    [107, 142, 35],
    [220, 20, 60],
    [0, 0, 142],
    [70, 130, 180],
    [250, 170, 30],
];

/// Colourised class map.
pub fn write_prediction_image(
    path: &Path,
    predictions: &[usize],
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let class = predictions[(y * width + x) as usize];
        image::Rgb(PALETTE[class % PALETTE.len()])
    });
    img.save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let mut cm = ConfusionMatrix::new(2);
        for _ in 0..3 {
            cm.add(0, 0);
        }
        cm.add(1, 1);
        assert_eq!(cm.metrics(), SegMetrics { accuracy: 1.0, miou: 1.0 });
    }

    #[test]
    fn iou_uses_union_of_label_and_prediction() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        // class 0: 1 / (2 + 1 - 1) = 0.5, class 1: 1 / (1 + 2 - 1) = 0.5
        assert_eq!(cm.per_class_iou(), vec![0.5, 0.5]);
        assert!((cm.accuracy() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn absent_classes_count_as_zero() {
        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 0);
        assert_eq!(cm.per_class_iou(), vec![1.0, 0.0, 0.0]);
        assert!((cm.mean_iou() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_matrix_is_all_zero() {
        assert_eq!(ConfusionMatrix::new(4).metrics(), SegMetrics::default());
    }

    #[test]
    fn argmax_picks_highest_class_per_pixel() {
        // batch 1, 3 classes, 2 pixels
        let scores = [0.1, 0.7, 0.5, 0.2, 0.4, 0.1];
        assert_eq!(argmax_classes(&scores, 1, 3, 2), vec![2, 1]);
    }
}
