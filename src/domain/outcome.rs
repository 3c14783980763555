// ============================================================
// Layer 3 — Per-Record Outcomes
// ============================================================
// Stages never abort on the first bad record. Each record is
// turned into a `Result<T, RecordError>` and the stage folds
// those results into a `StageReport`:
//
//   Ok(value)  → kept, counted as processed
//   Err(error) → dropped, kept in `failures` for the summary
//
// A stage that ends with zero kept records is fatal; the error
// message carries every collected failure so nothing is lost
// silently.

use std::fmt;

use anyhow::{bail, Result};
use thiserror::Error;

/// Why a single record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// Malformed row: wrong field count, unreadable line, bad JSON
    #[error("format error at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// A numeric field that does not parse after decimal substitution
    #[error("data error at line {line}, column '{column}': cannot parse '{value}' as a number")]
    Data { line: usize, column: String, value: String },

    /// Document present in only one of the joined sources
    #[error("document '{document_id}' has no matching {missing_from} record")]
    Unmatched { document_id: String, missing_from: &'static str },

    /// Raw score outside every configured bin of its criterion
    #[error("document '{document_id}': score {value} for criterion '{criterion}' is outside all configured bins")]
    Discretization { document_id: String, criterion: String, value: f64 },

    /// Criterion column absent for a document
    #[error("document '{document_id}': no value for criterion '{criterion}'")]
    MissingCriterion { document_id: String, criterion: String },

    /// Source file that cannot be read as UTF-8 text
    #[error("cannot read '{path}': {reason}")]
    Unreadable { path: String, reason: String },

    /// Tokenizer produced no tokens, or failed outright
    #[error("document '{document_id}': {reason}")]
    Tokenization { document_id: String, reason: String },
}

/// Processed / skipped / failed counters of one stage run.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub stage:     String,
    pub processed: usize,
    pub skipped:   usize,
    pub failures:  Vec<RecordError>,
}

impl StageReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self { stage: stage.into(), ..Default::default() }
    }

    /// Fold a sequence of per-record outcomes into kept values,
    /// recording every failure.
    pub fn collect<T, I>(&mut self, outcomes: I) -> Vec<T>
    where
        I: IntoIterator<Item = std::result::Result<T, RecordError>>,
    {
        let mut kept = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(v) => {
                    self.processed += 1;
                    kept.push(v);
                }
                Err(e) => self.fail(e),
            }
        }
        kept
    }

    /// Record one failure and log it.
    pub fn fail(&mut self, error: RecordError) {
        tracing::warn!("[{}] {}", self.stage, error);
        self.failures.push(error);
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Merge the counters of a sub-step into this report.
    pub fn absorb(&mut self, other: StageReport) {
        self.processed += other.processed;
        self.skipped   += other.skipped;
        self.failures.extend(other.failures);
    }

    /// Abort the stage when it produced nothing.
    pub fn ensure_output(&self, produced: usize) -> Result<()> {
        if produced == 0 {
            bail!(
                "stage '{}' produced zero records ({} failures):\n{}",
                self.stage,
                self.failed(),
                self.failure_summary()
            );
        }
        Ok(())
    }

    /// One line per failure, for fatal error messages.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Log the counters at info level.
    pub fn log(&self) {
        tracing::info!(
            "[{}] processed={} skipped={} failed={}",
            self.stage,
            self.processed,
            self.skipped,
            self.failed()
        );
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} skipped, {} failed",
            self.stage,
            self.processed,
            self.skipped,
            self.failed()
        )
    }
}
