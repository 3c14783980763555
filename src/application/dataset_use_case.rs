// ============================================================
// Layer 2 — DatasetUseCase
// ============================================================
// Reads `final_jsonl`, re-validates every label against the
// configured criteria (a no-op on the conversion step's own
// output) and writes the seeded train/validation split to
// `dataset_dir`.

use std::fmt;

use anyhow::{bail, Result};

use crate::data::{
    dataset::{DatasetDict, SplitEntry, TRAIN_SPLIT, VALIDATION_SPLIT},
    discretizer::Discretizer,
    loader::{read_jsonl, write_jsonl},
    splitter::split_train_val,
};
use crate::domain::{
    document::LabeledRecord,
    outcome::{RecordError, StageReport},
};
use crate::infra::config::PipelineConfig;

#[derive(Debug)]
pub struct DatasetSummary {
    pub train:      usize,
    pub validation: usize,
    pub report:     StageReport,
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} train / {} validation records ({})", self.train, self.validation, self.report)
    }
}

pub struct DatasetUseCase<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DatasetUseCase<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<DatasetSummary> {
        let cfg   = self.config;
        let dir   = &cfg.paths.dataset_dir;
        let split = &cfg.split;
        let mut report = StageReport::new("dataset");

        // ── Step 1: Load and validate labeled records ─────────────────────────
        let mut read_report = StageReport::new("dataset");
        let records: Vec<LabeledRecord> = read_jsonl(&cfg.paths.final_jsonl, &mut read_report)?;
        report.failures.extend(read_report.failures);

        let discretizer = Discretizer::new(&cfg.criteria);
        let records = report.collect(
            records
                .into_iter()
                .map(|mut r| -> std::result::Result<LabeledRecord, RecordError> {
                    r.labels = discretizer.validate_labels(&r.document_id, &r.labels)?;
                    Ok(r)
                })
                .collect::<Vec<_>>(),
        );
        report.ensure_output(records.len())?;

        // ── Step 2: Seeded split ──────────────────────────────────────────────
        let (train, validation) = split_train_val(records, split.validation_fraction, split.seed);
        if train.is_empty() || validation.is_empty() {
            bail!(
                "split of {} records at validation_fraction {} leaves an empty split",
                train.len() + validation.len(),
                split.validation_fraction
            );
        }

        // ── Step 3: Write ─────────────────────────────────────────────────────
        write_jsonl(&DatasetDict::split_path(dir, TRAIN_SPLIT), &train)?;
        write_jsonl(&DatasetDict::split_path(dir, VALIDATION_SPLIT), &validation)?;
        DatasetDict {
            splits: vec![
                SplitEntry { name: TRAIN_SPLIT.into(), num_rows: train.len() },
                SplitEntry { name: VALIDATION_SPLIT.into(), num_rows: validation.len() },
            ],
            seed:                split.seed,
            validation_fraction: split.validation_fraction,
            criteria:            cfg.criterion_ids(),
        }
        .save(dir)?;

        tracing::info!(
            "Dataset written to '{}': {} train, {} validation",
            dir.display(),
            train.len(),
            validation.len()
        );
        report.log();

        Ok(DatasetSummary { train: train.len(), validation: validation.len(), report })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{labeled, test_config};

    #[test]
    fn test_split_is_written_and_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let records: Vec<LabeledRecord> = (0..10).map(|i| labeled(&format!("R{i}"), 1, 2)).collect();
        write_jsonl(&cfg.paths.final_jsonl, &records).unwrap();

        let first = DatasetUseCase::new(&cfg).execute().unwrap();
        assert_eq!((first.train, first.validation), (8, 2));
        let train_a = std::fs::read_to_string(DatasetDict::split_path(&cfg.paths.dataset_dir, TRAIN_SPLIT)).unwrap();

        DatasetUseCase::new(&cfg).execute().unwrap();
        let train_b = std::fs::read_to_string(DatasetDict::split_path(&cfg.paths.dataset_dir, TRAIN_SPLIT)).unwrap();
        assert_eq!(train_a, train_b);

        let dict = DatasetDict::load(&cfg.paths.dataset_dir).unwrap();
        assert_eq!(dict.seed, 42);
        assert_eq!(dict.splits[1].num_rows, 2);
        assert_eq!(dict.criteria, vec!["C1".to_string(), "C3".to_string()]);
    }

    #[test]
    fn test_out_of_range_label_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let mut records: Vec<LabeledRecord> = (0..5).map(|i| labeled(&format!("R{i}"), 0, 1)).collect();
        records.push(labeled("bad", 1, 9));
        write_jsonl(&cfg.paths.final_jsonl, &records).unwrap();

        let summary = DatasetUseCase::new(&cfg).execute().unwrap();
        assert_eq!(summary.train + summary.validation, 5);
        assert!(matches!(
            &summary.report.failures[0],
            RecordError::Discretization { document_id, .. } if document_id == "bad"
        ));
    }

    #[test]
    fn test_single_record_cannot_fill_both_splits() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        write_jsonl(&cfg.paths.final_jsonl, &[labeled("only", 1, 1)]).unwrap();
        assert!(DatasetUseCase::new(&cfg).execute().is_err());
    }
}
