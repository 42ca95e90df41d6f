//! Host-side batch assembly and conversion to Burn tensors.
//!
//! Shapes (channels-first, as Burn convolutions expect):
//! - input: `[B, C, H, W]`
//! - label: `[B, K, H, W]` one-hot over `K` classes
//! - mask: `[B, H, W]`, 1.0 where the pixel carries a valid class id

use crate::preprocess::PreprocessMode;
use crate::types::{DatasetError, DatasetResult, SegSample};
use burn::tensor::{backend::Backend, Tensor, TensorData};

#[derive(Debug, Clone)]
pub struct SegBatch {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub n_classes: usize,
    /// Input values in NCHW order.
    pub inputs: Vec<f32>,
    /// Class ids in NHW order.
    pub classes: Vec<u8>,
}

pub struct SegTensors<B: Backend> {
    pub input: Tensor<B, 4>,
    pub label: Tensor<B, 4>,
    pub mask: Tensor<B, 3>,
}

impl SegBatch {
    pub fn from_samples(samples: &[SegSample], n_classes: usize) -> DatasetResult<Self> {
        let Some(first) = samples.first() else {
            return Err(DatasetError::Other("cannot collate empty batch".to_string()));
        };
        let expected = first.shape();
        let (width, height, channels) = expected;
        let pixels = (width * height) as usize;

        let mut inputs = Vec::with_capacity(samples.len() * channels * pixels);
        let mut classes = Vec::with_capacity(samples.len() * pixels);
        for sample in samples {
            if sample.shape() != expected {
                return Err(DatasetError::ShapeMismatch {
                    expected,
                    actual: sample.shape(),
                });
            }
            inputs.extend_from_slice(&sample.image_chw);
            classes.extend_from_slice(&sample.label);
        }

        Ok(Self {
            batch: samples.len(),
            channels,
            height: height as usize,
            width: width as usize,
            n_classes,
            inputs,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.batch == 0
    }

    pub fn preprocess(&mut self, mode: PreprocessMode) {
        mode.apply(&mut self.inputs);
    }

    /// Whether the pixel's class id is inside `0..n_classes`.
    pub fn is_valid(&self, class: u8) -> bool {
        (class as usize) < self.n_classes
    }

    /// Loss mask in NHW order.
    pub fn mask(&self) -> Vec<f32> {
        self.classes
            .iter()
            .map(|c| if self.is_valid(*c) { 1.0 } else { 0.0 })
            .collect()
    }

    /// One-hot labels in NKHW order; ignored pixels are all-zero.
    pub fn one_hot(&self) -> Vec<f32> {
        let plane = self.height * self.width;
        let mut out = vec![0.0f32; self.batch * self.n_classes * plane];
        for (i, class) in self.classes.iter().enumerate() {
            if !self.is_valid(*class) {
                continue;
            }
            let b = i / plane;
            let p = i % plane;
            out[(b * self.n_classes + *class as usize) * plane + p] = 1.0;
        }
        out
    }

    pub fn into_tensors<B: Backend>(self, device: &B::Device) -> SegTensors<B> {
        let [b, c, h, w, k] = [
            self.batch,
            self.channels,
            self.height,
            self.width,
            self.n_classes,
        ];
        let label = self.one_hot();
        let mask = self.mask();
        let input = Tensor::<B, 4>::from_data(TensorData::new(self.inputs, [b, c, h, w]), device);
        let label = Tensor::<B, 4>::from_data(TensorData::new(label, [b, k, h, w]), device);
        let mask = Tensor::<B, 3>::from_data(TensorData::new(mask, [b, h, w]), device);
        SegTensors { input, label, mask }
    }
}
