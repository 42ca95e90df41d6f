//! Best-checkpoint persistence: a burn record plus a small JSON sidecar.

use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Checkpoint name written under the model directory.
pub const BEST_CHECKPOINT: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    /// `None` when the epoch was saved without evaluation.
    pub accuracy: Option<f64>,
    pub miou: Option<f64>,
}

/// Persists model parameters for the training loop.
pub trait CheckpointSaver {
    fn save<B: Backend, M: Module<B>>(
        &mut self,
        name: &str,
        model: &M,
        meta: &CheckpointMeta,
    ) -> anyhow::Result<()>;
}

/// Writes `<dir>/<name>.bin` and `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path without extension; the recorder appends `.bin`.
    pub fn stem(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl CheckpointSaver for FileCheckpoint {
    fn save<B: Backend, M: Module<B>>(
        &mut self,
        name: &str,
        model: &M,
        meta: &CheckpointMeta,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create checkpoint dir {}", self.dir.display()))?;
        let stem = self.stem(name);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(stem.clone(), &recorder)
            .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", stem.display()))?;

        let meta_path = stem.with_extension("json");
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(&meta_path, json)
            .with_context(|| format!("failed to write {}", meta_path.display()))?;
        tracing::debug!(path = %stem.display(), epoch = meta.epoch, "checkpoint saved");
        Ok(())
    }
}

/// Loads `<stem>.bin` into `model` when it exists.
///
/// Returns the (possibly restored) model and whether a record was found.
/// A missing record keeps the freshly initialised parameters; a record that
/// fails to load is an error.
pub fn restore_or_init<B: Backend, M: Module<B>>(
    model: M,
    stem: &Path,
    device: &B::Device,
) -> anyhow::Result<(M, bool)> {
    let record = stem.with_extension("bin");
    if !record.exists() {
        tracing::warn!(path = %record.display(), "no checkpoint found; starting from random init");
        return Ok((model, false));
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(stem.to_path_buf(), &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", record.display()))?;
    tracing::info!(path = %record.display(), "restored checkpoint");
    Ok((model, true))
}

pub fn read_meta(stem: &Path) -> anyhow::Result<CheckpointMeta> {
    let path = stem.with_extension("json");
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Best mean-IoU seen in one run. Starts at 0, so a run whose every epoch
/// scores 0 never saves.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestTracker {
    best: f64,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Records `miou` and reports whether it strictly beats the previous best.
    pub fn observe(&mut self, miou: f64) -> bool {
        if miou > self.best {
            self.best = miou;
            true
        } else {
            false
        }
    }
}
