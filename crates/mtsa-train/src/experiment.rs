//! Append-only per-epoch experiment log.
//!
//! Both trainers push one [`EpochRecord`] per epoch. Rows are never edited
//! after they are appended; the log can be written as JSON Lines.

use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::TrainResult;

/// Training phase a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// GANF likelihood training under the acyclicity penalty.
    Flow,
    /// RANSynCoders frequency-coder warm-up.
    FrequencyWarmup,
    /// RANSynCoders sinusoid-coder warm-up.
    SineWarmup,
    /// RANSynCoders bound training.
    Bounds,
}

/// One epoch's scalar metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Index of the series being trained on.
    pub dataset: usize,
    /// Epoch number within the stage, starting at 1.
    pub epoch: usize,
    /// Training phase.
    pub stage: Stage,
    /// Mean primary loss over the epoch (−log p, reconstruction or sine loss).
    pub loss: f64,
    /// Mean upper-bound quantile loss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound_loss: Option<f64>,
    /// Mean lower-bound quantile loss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound_loss: Option<f64>,
    /// Learning rate of the sinusoid coder during the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sine_learning_rate: Option<f64>,
    /// Penalty weight at the end of the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rho: Option<f64>,
    /// Lagrange multiplier at the end of the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    /// Acyclicity value at the last step of the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
}

impl EpochRecord {
    /// A row with only the primary loss filled in.
    pub fn new(dataset: usize, epoch: usize, stage: Stage, loss: f64) -> Self {
        EpochRecord {
            dataset,
            epoch,
            stage,
            loss,
            upper_bound_loss: None,
            lower_bound_loss: None,
            sine_learning_rate: None,
            rho: None,
            alpha: None,
            h: None,
        }
    }
}

/// Append-only table of [`EpochRecord`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentLog {
    rows: Vec<EpochRecord>,
}

impl ExperimentLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row.
    pub fn push(&mut self, record: EpochRecord) {
        self.rows.push(record);
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> &[EpochRecord] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows of one stage.
    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &EpochRecord> {
        self.rows.iter().filter(move |r| r.stage == stage)
    }

    /// Write the log as JSON Lines, one record per line.
    pub fn write_jsonl(&self, path: &Path) -> TrainResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(std::fs::File::create(path)?);
        for row in &self.rows {
            serde_json::to_writer(&mut w, row)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rows_keep_insertion_order() {
        let mut log = ExperimentLog::new();
        log.push(EpochRecord::new(0, 1, Stage::FrequencyWarmup, 0.4));
        log.push(EpochRecord::new(0, 1, Stage::Bounds, 0.2));
        log.push(EpochRecord::new(1, 1, Stage::Bounds, 0.1));
        assert_eq!(log.len(), 3);
        assert_eq!(log.rows()[0].stage, Stage::FrequencyWarmup);
        assert_eq!(log.stage(Stage::Bounds).count(), 2);
    }

    #[test]
    fn jsonl_has_one_line_per_row() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("log.jsonl");
        let mut log = ExperimentLog::new();
        let mut row = EpochRecord::new(0, 3, Stage::Flow, 1.25);
        row.rho = Some(10.0);
        log.push(row);
        log.push(EpochRecord::new(0, 4, Stage::Flow, 1.0));
        log.write_jsonl(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: EpochRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.rho, Some(10.0));
        assert!(!lines[1].contains("rho"));
    }
}
