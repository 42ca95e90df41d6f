//! Masked softmax cross-entropy and the primary/auxiliary weighting.

use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, ElementConversion, Tensor};

pub const PRIMARY_LOSS_WEIGHT: f64 = 1.0;
pub const AUX_LOSS_WEIGHT: f64 = 0.8;

/// Softmax cross-entropy over the class axis, weighted per pixel by `mask`
/// and averaged over the pixels whose weight is non-zero.
///
/// - `logits`, `labels`: `[B, K, H, W]`, labels one-hot
/// - `mask`: `[B, H, W]`
///
/// A batch without any weighted pixel yields 0.
pub fn weighted_softmax_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    labels: Tensor<B, 4>,
    mask: Tensor<B, 3>,
) -> Tensor<B, 1> {
    let [b, _, h, w] = logits.dims();
    let per_pixel = (labels * log_softmax(logits, 1))
        .sum_dim(1)
        .neg()
        .reshape([b, h, w]);
    let weighted = (per_pixel * mask.clone()).sum();
    let nonzero = mask.not_equal_elem(0.0).float().sum().clamp_min(1.0);
    weighted / nonzero
}

pub fn combine_losses<B: Backend>(primary: Tensor<B, 1>, aux: Tensor<B, 1>) -> Tensor<B, 1> {
    primary.mul_scalar(PRIMARY_LOSS_WEIGHT) + aux.mul_scalar(AUX_LOSS_WEIGHT)
}

/// Scalar form of `combine_losses`, used for the values written to history.
pub fn combine_loss_values(primary: f64, aux: f64) -> f64 {
    PRIMARY_LOSS_WEIGHT * primary + AUX_LOSS_WEIGHT * aux
}

pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn t4(values: Vec<f32>, shape: [usize; 4]) -> Tensor<B, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn t3(values: Vec<f32>, shape: [usize; 3]) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn uniform_logits_give_log_k() {
        // 1 sample, 2 classes, 1x2 pixels, both labelled class 0.
        let logits = t4(vec![0.0, 0.0, 0.0, 0.0], [1, 2, 1, 2]);
        let labels = t4(vec![1.0, 1.0, 0.0, 0.0], [1, 2, 1, 2]);
        let mask = t3(vec![1.0, 1.0], [1, 1, 2]);
        let loss = scalar(weighted_softmax_cross_entropy(logits, labels, mask));
        assert!((loss - 2f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn masked_pixels_do_not_contribute() {
        // Pixel 0 is perfectly predicted, pixel 1 is badly wrong but masked.
        let logits = t4(vec![20.0, -20.0, -20.0, 20.0], [1, 2, 1, 2]);
        let labels = t4(vec![1.0, 1.0, 0.0, 0.0], [1, 2, 1, 2]);
        let mask = t3(vec![1.0, 0.0], [1, 1, 2]);
        let loss = scalar(weighted_softmax_cross_entropy(logits, labels, mask));
        assert!(loss < 1e-4);
    }

    #[test]
    fn fully_masked_batch_is_zero() {
        let logits = t4(vec![1.0, 2.0], [1, 2, 1, 1]);
        let labels = t4(vec![0.0, 0.0], [1, 2, 1, 1]);
        let mask = t3(vec![0.0], [1, 1, 1]);
        let loss = scalar(weighted_softmax_cross_entropy(logits, labels, mask));
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn combined_loss_weights_aux_by_point_eight() {
        for (p, a) in [(0.0, 0.0), (1.0, 1.0), (2.5, 0.125), (0.3, 7.0)] {
            assert_eq!(combine_loss_values(p, a), 1.0 * p + 0.8 * a);
        }
        let device = Default::default();
        let p = Tensor::<B, 1>::from_floats([2.0], &device);
        let a = Tensor::<B, 1>::from_floats([1.0], &device);
        assert!((scalar(combine_losses(p, a)) - 2.8).abs() < 1e-6);
    }
}
