//! Burn segmentation models.
//!
//! This crate defines the network trained by the `training` crate:
//! - `SegNet`: a compact encoder/decoder with a full-resolution primary head
//!   and an auxiliary head tapped from the bottleneck.
//!
//! Shapes:
//! - Input: `[B, C, H, W]`
//! - Primary / auxiliary logits: `[B, K, H, W]` for `K` classes
//!
//! Models are plain Burn modules; the training loop only sees them through
//! the `Segmenter` trait.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Dropout, DropoutConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// What a segmentation network exposes to training and evaluation.
pub trait Segmenter<B: Backend> {
    fn num_classes(&self) -> usize;

    /// Primary and auxiliary logits, both at input resolution.
    fn segment_with_aux(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>);

    /// Primary logits only.
    fn segment(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.segment_with_aux(input).0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegNetConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    /// Channel widths at 1, 1/2 and 1/4 resolution.
    pub widths: [usize; 3],
    pub dropout: f64,
}

impl Default for SegNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            num_classes: 6,
            widths: [16, 32, 64],
            dropout: 0.1,
        }
    }
}

impl SegNetConfig {
    pub fn new(in_channels: usize, num_classes: usize) -> Self {
        Self {
            in_channels,
            num_classes,
            ..Default::default()
        }
    }

    pub fn with_widths(mut self, widths: [usize; 3]) -> Self {
        self.widths = widths;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SegNet<B> {
        SegNet::new(self.clone(), device)
    }
}

fn conv3x3<B: Backend>(
    channels: [usize; 2],
    stride: usize,
    dilation: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_stride([stride, stride])
        .with_dilation([dilation, dilation])
        .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
        .init(device)
}

fn conv1x1<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [1, 1])
        .with_padding(PaddingConfig2d::Valid)
        .init(device)
}

fn resize<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if [h, w] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
}

#[derive(Debug, Module)]
pub struct SegNet<B: Backend> {
    stem: Conv2d<B>,
    down1: Conv2d<B>,
    down2: Conv2d<B>,
    context: Conv2d<B>,
    fuse1: Conv2d<B>,
    fuse0: Conv2d<B>,
    head: Conv2d<B>,
    aux_head: Conv2d<B>,
    dropout: Dropout,
    num_classes: usize,
}

impl<B: Backend> SegNet<B> {
    pub fn new(cfg: SegNetConfig, device: &B::Device) -> Self {
        let [c0, c1, c2] = cfg.widths;
        let classes = cfg.num_classes.max(1);
        Self {
            stem: conv3x3([cfg.in_channels, c0], 1, 1, device),
            down1: conv3x3([c0, c1], 2, 1, device),
            down2: conv3x3([c1, c2], 2, 1, device),
            context: conv3x3([c2, c2], 1, 2, device),
            fuse1: conv3x3([c2 + c1, c1], 1, 1, device),
            fuse0: conv3x3([c1 + c0, c0], 1, 1, device),
            head: conv1x1([c0, classes], device),
            aux_head: conv1x1([c2, classes], device),
            dropout: DropoutConfig::new(cfg.dropout).init(),
            num_classes: classes,
        }
    }

    /// Forward pass returning (primary_logits, aux_logits).
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [_, _, h, w] = input.dims();

        let f0 = relu(self.stem.forward(input));
        let f1 = relu(self.down1.forward(f0.clone()));
        let f2 = relu(self.down2.forward(f1.clone()));
        let ctx = self.dropout.forward(relu(self.context.forward(f2)));

        let aux = resize(self.aux_head.forward(ctx.clone()), [h, w]);

        let [_, _, h1, w1] = f1.dims();
        let up1 = resize(ctx, [h1, w1]);
        let d1 = relu(self.fuse1.forward(Tensor::cat(vec![up1, f1], 1)));

        let [_, _, h0, w0] = f0.dims();
        let up0 = resize(d1, [h0, w0]);
        let d0 = relu(self.fuse0.forward(Tensor::cat(vec![up0, f0], 1)));

        let primary = resize(self.head.forward(d0), [h, w]);
        (primary, aux)
    }
}

impl<B: Backend> Segmenter<B> for SegNet<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn segment_with_aux(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        self.forward(input)
    }
}

pub mod prelude {
    pub use super::{SegNet, SegNetConfig, Segmenter};
}
