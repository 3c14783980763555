// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch, global_step, learning_rate (last optimizer step)
//   - train_loss:        mean weighted BCE over training batches
//   - eval_loss:         mean weighted BCE over validation batches
//   - f1_macro, f1_micro, accuracy at tuned thresholds
//   - f1_macro_default:  f1_macro at the 0.5 threshold
//   - doc_f1_macro:      f1_macro after per-report aggregation
//
// Output file: <model_output_path>/metrics.csv
//
// Example CSV output:
//   epoch,global_step,learning_rate,train_loss,eval_loss,f1_macro,...
//   1,12,0.000012,0.693100,0.688400,0.412000,...
//
// How to read the metrics:
//   - eval_loss rising while train_loss falls → overfitting
//   - f1_macro well above f1_macro_default → the tuned thresholds
//     matter; they are saved with the final model

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::evaluation::EvaluationReport;

const HEADER: &str =
    "epoch,global_step,learning_rate,train_loss,eval_loss,f1_macro,f1_micro,accuracy,f1_macro_default,doc_f1_macro";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:            usize,
    pub global_step:      usize,
    pub learning_rate:    f64,
    pub train_loss:       f64,
    pub eval_loss:        f64,
    pub f1_macro:         f64,
    pub f1_micro:         f64,
    pub accuracy:         f64,
    pub f1_macro_default: f64,
    pub doc_f1_macro:     f64,
}

impl EpochMetrics {
    /// Pick the logged columns out of an evaluation report.
    pub fn from_report(
        epoch:         usize,
        global_step:   usize,
        learning_rate: f64,
        train_loss:    f64,
        report:        &EvaluationReport,
    ) -> Self {
        let get = |name: &str| report.metric(name).unwrap_or(f64::NAN);
        Self {
            epoch,
            global_step,
            learning_rate,
            train_loss,
            eval_loss:        get("eval_loss"),
            f1_macro:         get("f1_macro"),
            f1_micro:         get("f1_micro"),
            accuracy:         get("accuracy"),
            f1_macro_default: get("f1_macro_default"),
            doc_f1_macro:     get("doc_f1_macro"),
        }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Open `<dir>/metrics.csv`. A fresh run truncates it; a resumed
    /// run appends to the rows already written.
    pub fn new(dir: &Path, fresh: bool) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");

        if fresh || !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{},{:.8},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            m.epoch,
            m.global_step,
            m.learning_rate,
            m.train_loss,
            m.eval_loss,
            m.f1_macro,
            m.f1_micro,
            m.accuracy,
            m.f1_macro_default,
            m.doc_f1_macro,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, eval_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.eval_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn report(f1: f64) -> EvaluationReport {
        let mut metrics = BTreeMap::new();
        metrics.insert("f1_macro".to_string(), f1);
        metrics.insert("eval_loss".to_string(), 0.5);
        EvaluationReport { metrics, thresholds: vec![0.5] }
    }

    #[test]
    fn test_missing_metric_is_nan() {
        let m = EpochMetrics::from_report(1, 4, 1e-5, 0.7, &report(0.4));
        assert_eq!(m.f1_macro, 0.4);
        assert_eq!(m.eval_loss, 0.5);
        assert!(m.doc_f1_macro.is_nan());
    }

    #[test]
    fn test_fresh_truncates_resume_appends() {
        let dir = tempfile::tempdir().unwrap();
        let row = EpochMetrics::from_report(1, 4, 1e-5, 0.7, &report(0.4));

        let logger = MetricsLogger::new(dir.path(), true).unwrap();
        logger.log(&row).unwrap();
        let logger = MetricsLogger::new(dir.path(), false).unwrap();
        logger.log(&row).unwrap();
        let text = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("epoch,global_step"));

        MetricsLogger::new(dir.path(), true).unwrap();
        let text = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
