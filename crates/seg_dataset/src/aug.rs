//! Label-safe augmentation for segmentation samples.
//!
//! Every geometric transform is applied to the image and the label map
//! together; photometric transforms only touch the image. Labels are always
//! resampled with nearest-neighbour so class ids never blend.

use crate::types::{SegSample, IGNORE_LABEL};
use image::imageops::FilterType;
use image::{GrayImage, ImageBuffer, Luma};
use rand::Rng;
use std::cmp::max;

type PlaneF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone, PartialEq)]
pub struct TransformPipeline {
    /// Probability of applying a horizontal flip.
    pub flip_horizontal_prob: f32,
    /// Probability of applying a scale jitter (zoom in/out, then crop or pad).
    pub scale_jitter_prob: f32,
    pub scale_jitter_min: f32,
    pub scale_jitter_max: f32,
    /// Probability of a brightness/contrast jitter.
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    /// Probability of additive uniform noise.
    pub noise_prob: f32,
    /// Max absolute noise as a fraction of the 0..255 range.
    pub noise_strength: f32,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformPipeline {
    /// A pipeline that leaves samples untouched.
    pub fn identity() -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            scale_jitter_prob: 0.0,
            scale_jitter_min: 1.0,
            scale_jitter_max: 1.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
            noise_prob: 0.0,
            noise_strength: 0.0,
        }
    }

    /// Preset used for segmentation training batches.
    pub fn segmentation() -> Self {
        TransformPipelineBuilder::new()
            .flip_horizontal_prob(0.5)
            .scale_jitter(0.5, 0.8, 1.25)
            .color_jitter(0.3, 0.2)
            .noise(0.1, 0.02)
            .build()
    }

    pub fn is_identity(&self) -> bool {
        self.flip_horizontal_prob <= 0.0
            && self.scale_jitter_prob <= 0.0
            && self.color_jitter_prob <= 0.0
            && self.noise_prob <= 0.0
    }

    pub fn describe(&self) -> String {
        format!(
            "flip_p={:.2} scale_jitter_p={:.2} range=[{:.2},{:.2}] color_jitter_p={:.2} strength={:.2} noise_p={:.2} strength={:.3}",
            self.flip_horizontal_prob,
            self.scale_jitter_prob,
            self.scale_jitter_min,
            self.scale_jitter_max,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.noise_prob,
            self.noise_strength,
        )
    }

    pub fn apply<R: Rng + ?Sized>(&self, mut sample: SegSample, rng: &mut R) -> SegSample {
        maybe_hflip(&mut sample, self.flip_horizontal_prob, rng);
        maybe_scale_jitter(
            &mut sample,
            self.scale_jitter_prob,
            self.scale_jitter_min,
            self.scale_jitter_max,
            rng,
        );
        maybe_jitter(
            &mut sample,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
        maybe_noise(&mut sample, self.noise_prob, self.noise_strength, rng);
        sample
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline::identity(),
        }
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn scale_jitter(mut self, prob: f32, min: f32, max: f32) -> Self {
        self.inner.scale_jitter_prob = prob;
        self.inner.scale_jitter_min = min;
        self.inner.scale_jitter_max = max;
        self
    }
    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.inner.color_jitter_prob = prob;
        self.inner.color_jitter_strength = strength;
        self
    }
    pub fn noise(mut self, prob: f32, strength: f32) -> Self {
        self.inner.noise_prob = prob;
        self.inner.noise_strength = strength;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

fn split_planes(sample: &SegSample) -> Vec<PlaneF32> {
    let plane = (sample.width * sample.height) as usize;
    sample
        .image_chw
        .chunks(plane)
        .map(|chunk| {
            PlaneF32::from_raw(sample.width, sample.height, chunk.to_vec())
                .unwrap_or_else(|| PlaneF32::new(sample.width, sample.height))
        })
        .collect()
}

fn join_planes(planes: Vec<PlaneF32>) -> Vec<f32> {
    planes.into_iter().flat_map(|p| p.into_raw()).collect()
}

fn label_image(sample: &SegSample) -> GrayImage {
    GrayImage::from_raw(sample.width, sample.height, sample.label.clone())
        .unwrap_or_else(|| GrayImage::from_pixel(sample.width, sample.height, Luma([IGNORE_LABEL])))
}

pub(crate) fn maybe_hflip<R: Rng + ?Sized>(sample: &mut SegSample, prob: f32, rng: &mut R) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let mut planes = split_planes(sample);
    for plane in planes.iter_mut() {
        image::imageops::flip_horizontal_in_place(plane);
    }
    let mut label = label_image(sample);
    image::imageops::flip_horizontal_in_place(&mut label);
    sample.image_chw = join_planes(planes);
    sample.label = label.into_raw();
}

pub(crate) fn maybe_scale_jitter<R: Rng + ?Sized>(
    sample: &mut SegSample,
    prob: f32,
    min_scale: f32,
    max_scale: f32,
    rng: &mut R,
) {
    if prob <= 0.0 || min_scale <= 0.0 || max_scale <= 0.0 || min_scale >= max_scale {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let scale = rng.random_range(min_scale..max_scale);
    let (w, h) = (sample.width, sample.height);
    let new_w = max(1, (w as f32 * scale).round() as u32);
    let new_h = max(1, (h as f32 * scale).round() as u32);

    // Zoom in crops the center, zoom out pads with zeros / ignore labels.
    let (dx, dy) = if new_w >= w && new_h >= h {
        (-(((new_w - w) / 2) as i64), -(((new_h - h) / 2) as i64))
    } else {
        (
            (w.saturating_sub(new_w) / 2) as i64,
            (h.saturating_sub(new_h) / 2) as i64,
        )
    };

    let planes = split_planes(sample)
        .into_iter()
        .map(|plane| {
            let resized = image::imageops::resize(&plane, new_w, new_h, FilterType::Triangle);
            let mut canvas = PlaneF32::new(w, h);
            image::imageops::replace(&mut canvas, &resized, dx, dy);
            canvas
        })
        .collect::<Vec<_>>();

    let resized_label =
        image::imageops::resize(&label_image(sample), new_w, new_h, FilterType::Nearest);
    let mut label_canvas = GrayImage::from_pixel(w, h, Luma([IGNORE_LABEL]));
    image::imageops::replace(&mut label_canvas, &resized_label, dx, dy);

    sample.image_chw = join_planes(planes);
    sample.label = label_canvas.into_raw();
}

pub(crate) fn maybe_jitter<R: Rng + ?Sized>(
    sample: &mut SegSample,
    prob: f32,
    strength: f32,
    rng: &mut R,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for v in sample.image_chw.iter_mut() {
        let x = *v / 255.0;
        let x = ((x - 0.5) * contrast + 0.5) * bright;
        *v = x.clamp(0.0, 1.0) * 255.0;
    }
}

pub(crate) fn maybe_noise<R: Rng + ?Sized>(
    sample: &mut SegSample,
    prob: f32,
    strength: f32,
    rng: &mut R,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    for v in sample.image_chw.iter_mut() {
        let noise = rng.random_range(-strength..strength) * 255.0;
        *v = (*v + noise).clamp(0.0, 255.0);
    }
}

#[cfg(test)]
mod aug_tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp_sample() -> SegSample {
        // 4x2 single-channel ramp with label == column index.
        let image = vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0];
        let label = vec![0, 1, 2, 3, 0, 1, 2, 3];
        SegSample::new(4, 2, 1, image, label).unwrap()
    }

    #[test]
    fn hflip_moves_image_and_label_together() {
        let mut sample = ramp_sample();
        let mut rng = StdRng::seed_from_u64(1);
        maybe_hflip(&mut sample, 1.0, &mut rng);
        assert_eq!(sample.image_chw, vec![3.0, 2.0, 1.0, 0.0, 13.0, 12.0, 11.0, 10.0]);
        assert_eq!(sample.label, vec![3, 2, 1, 0, 3, 2, 1, 0]);
    }

    #[test]
    fn scale_jitter_keeps_shape_and_valid_labels() {
        let mut sample = ramp_sample();
        let mut rng = StdRng::seed_from_u64(3);
        maybe_scale_jitter(&mut sample, 1.0, 0.5, 2.0, &mut rng);
        assert_eq!(sample.shape(), (4, 2, 1));
        assert_eq!(sample.image_chw.len(), 8);
        assert!(sample
            .label
            .iter()
            .all(|l| *l <= 3 || *l == IGNORE_LABEL));
    }

    #[test]
    fn identity_pipeline_is_a_no_op() {
        let sample = ramp_sample();
        let mut rng = StdRng::seed_from_u64(9);
        let out = TransformPipeline::identity().apply(sample.clone(), &mut rng);
        assert_eq!(out.image_chw, sample.image_chw);
        assert_eq!(out.label, sample.label);
    }

    #[test]
    fn photometric_jitter_never_touches_labels() {
        let mut sample = ramp_sample();
        let mut rng = StdRng::seed_from_u64(5);
        maybe_jitter(&mut sample, 1.0, 0.5, &mut rng);
        maybe_noise(&mut sample, 1.0, 0.5, &mut rng);
        assert_eq!(sample.label, ramp_sample().label);
        assert!(sample.image_chw.iter().all(|v| (0.0..=255.0).contains(v)));
    }
}
