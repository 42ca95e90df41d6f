//! Per-run loss/metric history and its whitespace-delimited text tables.

use crate::metrics::SegMetrics;
use anyhow::Context;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Series logged during one training run. Created empty per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunHistory {
    pub train_total: Vec<f64>,
    pub train_aux: Vec<f64>,
    pub train_model: Vec<f64>,
    pub epochs: Vec<usize>,
    pub test_accuracy: Vec<f64>,
    pub test_miou: Vec<f64>,
}

/// Loss scalars for one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub total: f64,
    pub model: f64,
    pub aux: f64,
}

/// Files written by `RunHistory::write`.
#[derive(Debug, Clone)]
pub struct HistoryFiles {
    pub train: PathBuf,
    pub test: PathBuf,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_step(&mut self, epoch: usize, losses: StepLosses) {
        self.train_total.push(losses.total);
        self.train_aux.push(losses.aux);
        self.train_model.push(losses.model);
        self.epochs.push(epoch);
    }

    pub fn record_eval(&mut self, metrics: SegMetrics) {
        self.test_accuracy.push(metrics.accuracy);
        self.test_miou.push(metrics.miou);
    }

    pub fn train_rows(&self) -> usize {
        self.train_total.len()
    }

    pub fn test_rows(&self) -> usize {
        self.test_accuracy.len()
    }

    pub fn best_miou(&self) -> Option<f64> {
        self.test_miou.iter().copied().reduce(f64::max)
    }

    /// Writes `<stamp>_train.txt` (total, aux, model, epoch per step) and
    /// `<stamp>_test.txt` (accuracy, miou per evaluated epoch) into `dir`.
    pub fn write(&self, dir: &Path, stamp: &str) -> anyhow::Result<HistoryFiles> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create history dir {}", dir.display()))?;
        let epochs: Vec<f64> = self.epochs.iter().map(|e| *e as f64).collect();
        let train = dir.join(format!("{stamp}_train.txt"));
        write_table(
            &train,
            &[
                ("total", self.train_total.as_slice()),
                ("aux", self.train_aux.as_slice()),
                ("model", self.train_model.as_slice()),
                ("epoch", epochs.as_slice()),
            ],
        )?;
        let test = dir.join(format!("{stamp}_test.txt"));
        write_table(
            &test,
            &[
                ("accuracy", self.test_accuracy.as_slice()),
                ("miou", self.test_miou.as_slice()),
            ],
        )?;
        Ok(HistoryFiles { train, test })
    }
}

/// Run timestamp used to name history files.
pub fn run_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// One column per named series, one row per index. All series must share a length.
pub fn write_table(path: &Path, columns: &[(&str, &[f64])]) -> anyhow::Result<()> {
    let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
    if let Some((name, col)) = columns.iter().find(|(_, c)| c.len() != rows) {
        anyhow::bail!(
            "series `{name}` has {} values but `{}` has {rows}",
            col.len(),
            columns[0].0
        );
    }

    let file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let header: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    writeln!(out, "# {}", header.join(" "))?;
    for row in 0..rows {
        let line: Vec<String> = columns.iter().map(|(_, c)| format_value(c[row])).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

/// Reads a table written by `write_table` back into rows.
pub fn read_table(path: &Path) -> anyhow::Result<Vec<Vec<f64>>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .map(|l| {
            l.split_whitespace()
                .map(|v| {
                    v.parse::<f64>()
                        .with_context(|| format!("bad value `{v}` in {}", path.display()))
                })
                .collect()
        })
        .collect()
}

/// Scientific notation with 18 fractional digits and a signed two-digit exponent.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let raw = format!("{v:.18e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}
