//! The epoch/step training loop.

use crate::checkpoint::{BestTracker, CheckpointMeta, CheckpointSaver, BEST_CHECKPOINT};
use crate::history::{run_stamp, RunHistory, StepLosses};
use crate::loss::{combine_loss_values, combine_losses, scalar, weighted_softmax_cross_entropy};
use crate::metrics::{evaluate, EvalOptions};
use crate::schedule::{lr_decay, LearningRate, END_LEARNING_RATE};
use anyhow::Context;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use models::Segmenter;
use seg_dataset::{PreprocessMode, SegmentationLoader, Split};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Apply the loader's augmentation pipeline to training batches.
    pub augment: bool,
    pub init_lr: f64,
    pub end_lr: f64,
    /// Evaluate every epoch and keep only improving checkpoints. When off,
    /// the checkpoint is overwritten every epoch.
    pub evaluate: bool,
    pub best_checkpoint: String,
    pub preprocess: PreprocessMode,
    pub max_eval_samples: Option<usize>,
    pub show_loss: bool,
    /// Directory for the history tables; `None` keeps them in memory only.
    pub history_dir: Option<PathBuf>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 15,
            batch_size: 8,
            augment: false,
            init_lr: 1e-4,
            end_lr: END_LEARNING_RATE,
            evaluate: true,
            best_checkpoint: BEST_CHECKPOINT.to_string(),
            preprocess: PreprocessMode::None,
            max_eval_samples: Some(250),
            show_loss: true,
            history_dir: None,
        }
    }
}

/// One more step than full batches, so a trailing partial batch is never skipped.
pub fn steps_per_epoch(n_samples: usize, batch_size: usize) -> usize {
    n_samples / batch_size.max(1) + 1
}

/// Trains `model` for `opts.epochs` epochs and returns it with the run history.
///
/// `lr` is rewritten at the start of each epoch and read by every step.
pub fn train<B, M, O, L, S>(
    loader: &mut L,
    mut model: M,
    optim: &mut O,
    lr: &mut LearningRate,
    saver: &mut S,
    opts: &TrainOptions,
    device: &B::Device,
) -> anyhow::Result<(M, RunHistory)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Segmenter<B>,
    M::InnerModule: Segmenter<B::InnerBackend>,
    O: Optimizer<M, B>,
    L: SegmentationLoader,
    S: CheckpointSaver,
{
    let mut history = RunHistory::new();
    if opts.epochs == 0 {
        return Ok((model, history));
    }

    let batch_size = opts.batch_size.max(1);
    let steps = steps_per_epoch(loader.n_samples(Split::Train), batch_size);
    let eval_opts = EvalOptions::validation(opts.preprocess, opts.max_eval_samples);
    let mut best = BestTracker::new();

    for epoch in 0..opts.epochs {
        lr_decay(lr, opts.init_lr, opts.end_lr, epoch, opts.epochs);
        tracing::info!(epoch, lr = lr.get(), steps, "epoch start");

        for step in 0..steps {
            let mut batch = loader
                .next_batch(batch_size, Split::Train, opts.augment)
                .with_context(|| format!("failed to load batch {step} of epoch {epoch}"))?;
            batch.preprocess(opts.preprocess);
            let tensors = batch.into_tensors::<B>(device);

            let (primary, aux) = model.segment_with_aux(tensors.input);
            let model_loss =
                weighted_softmax_cross_entropy(primary, tensors.label.clone(), tensors.mask.clone());
            let aux_loss = weighted_softmax_cross_entropy(aux, tensors.label, tensors.mask);
            let loss = combine_losses(model_loss.clone(), aux_loss.clone());

            let model_value = scalar(model_loss.detach());
            let aux_value = scalar(aux_loss.detach());
            let losses = StepLosses {
                total: combine_loss_values(model_value, aux_value),
                model: model_value,
                aux: aux_value,
            };

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr.get(), model, grads);

            if opts.show_loss {
                tracing::info!(epoch, step, loss = losses.total, "train step");
            }
            history.record_step(epoch, losses);
        }

        if opts.evaluate {
            let valid = model.valid();
            let metrics = evaluate::<B::InnerBackend, _, _>(loader, &valid, &eval_opts, device)
                .with_context(|| format!("evaluation failed after epoch {epoch}"))?;
            tracing::info!(
                epoch,
                accuracy = metrics.accuracy,
                miou = metrics.miou,
                "test metrics"
            );
            history.record_eval(metrics);
            if best.observe(metrics.miou) {
                let meta = CheckpointMeta {
                    epoch,
                    accuracy: Some(metrics.accuracy),
                    miou: Some(metrics.miou),
                };
                saver.save::<B, M>(&opts.best_checkpoint, &model, &meta)?;
                tracing::info!(epoch, miou = metrics.miou, "new best checkpoint");
            }
        } else {
            let meta = CheckpointMeta {
                epoch,
                accuracy: None,
                miou: None,
            };
            saver.save::<B, M>(&opts.best_checkpoint, &model, &meta)?;
        }

        loader.shuffle_train();
    }

    if let Some(dir) = &opts.history_dir {
        let files = history.write(dir, &run_stamp())?;
        tracing::info!(
            train = %files.train.display(),
            test = %files.test.display(),
            "wrote run history"
        );
    }
    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_include_one_extra_batch() {
        assert_eq!(steps_per_epoch(20, 8), 3);
        assert_eq!(steps_per_epoch(16, 8), 3);
        assert_eq!(steps_per_epoch(7, 8), 1);
        assert_eq!(steps_per_epoch(0, 8), 1);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        assert_eq!(steps_per_epoch(5, 0), 6);
    }
}
