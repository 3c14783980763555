// ============================================================
// Layer 4 — Label Discretizer
// ============================================================
// Expert scores arrive on mixed scales: some criteria are
// yes/no, some 3-level, some 5-level, and a few were averaged
// across annotators so they carry fractions. The classifier
// needs one small integer per criterion.
//
// Each criterion has configured bins:
//
//   C3:  [0, 1) → 0    [1, 3) → 1    [3, 5] → 2
//
// A score outside every bin is an error for that document.
// Clamping it into the nearest bin would silently corrupt the
// supervision signal.
//
// Already-discrete labels (the `labels` map of a JSONL record)
// are not binned again: they are only checked against the
// criterion's label set, so re-running on discretized output
// leaves it unchanged.

use std::collections::BTreeMap;

use crate::domain::document::ScoreRecord;
use crate::domain::outcome::RecordError;
use crate::infra::config::CriterionConfig;

pub struct Discretizer<'a> {
    criteria: &'a [CriterionConfig],
}

impl<'a> Discretizer<'a> {
    pub fn new(criteria: &'a [CriterionConfig]) -> Self {
        Self { criteria }
    }

    /// Map one raw score onto its bin label.
    pub fn discretize(criterion: &CriterionConfig, score: f64) -> Option<u8> {
        criterion
            .bins
            .iter()
            .find(|bin| bin.contains(score))
            .map(|bin| bin.label)
    }

    /// Bin every configured criterion of a score record.
    ///
    /// Columns that are not configured criteria are ignored.
    pub fn discretize_record(
        &self,
        record: &ScoreRecord,
    ) -> Result<BTreeMap<String, u8>, RecordError> {
        let mut labels = BTreeMap::new();

        for criterion in self.criteria {
            let score = *record.scores.get(&criterion.id).ok_or_else(|| {
                RecordError::MissingCriterion {
                    document_id: record.document_id.clone(),
                    criterion:   criterion.id.clone(),
                }
            })?;

            let label = Self::discretize(criterion, score).ok_or_else(|| {
                RecordError::Discretization {
                    document_id: record.document_id.clone(),
                    criterion:   criterion.id.clone(),
                    value:       score,
                }
            })?;
            labels.insert(criterion.id.clone(), label);
        }

        Ok(labels)
    }

    /// Check already-discrete labels against each criterion's label
    /// set and return them unchanged.
    pub fn validate_labels(
        &self,
        document_id: &str,
        labels:      &BTreeMap<String, u8>,
    ) -> Result<BTreeMap<String, u8>, RecordError> {
        let mut out = BTreeMap::new();

        for criterion in self.criteria {
            let label = *labels.get(&criterion.id).ok_or_else(|| {
                RecordError::MissingCriterion {
                    document_id: document_id.to_string(),
                    criterion:   criterion.id.clone(),
                }
            })?;

            if !criterion.bins.iter().any(|bin| bin.label == label) {
                return Err(RecordError::Discretization {
                    document_id: document_id.to_string(),
                    criterion:   criterion.id.clone(),
                    value:       f64::from(label),
                });
            }
            out.insert(criterion.id.clone(), label);
        }

        Ok(out)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::BinConfig;

    fn three_level(id: &str) -> CriterionConfig {
        CriterionConfig {
            id:   id.to_string(),
            bins: vec![
                BinConfig { label: 0, min: 0.0, max: 1.0, max_inclusive: false },
                BinConfig { label: 1, min: 1.0, max: 3.0, max_inclusive: false },
                BinConfig { label: 2, min: 3.0, max: 5.0, max_inclusive: true },
            ],
        }
    }

    fn scores(pairs: &[(&str, f64)]) -> ScoreRecord {
        ScoreRecord::new(
            "doc",
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    #[test]
    fn test_bin_boundaries() {
        let c = three_level("C3");
        assert_eq!(Discretizer::discretize(&c, 0.5), Some(0));
        assert_eq!(Discretizer::discretize(&c, 2.9), Some(1));
        assert_eq!(Discretizer::discretize(&c, 5.0), Some(2));
        assert_eq!(Discretizer::discretize(&c, 7.0), None);
    }

    #[test]
    fn test_out_of_range_score_is_error_not_clamped() {
        let criteria = vec![three_level("C3")];
        let d        = Discretizer::new(&criteria);
        let err      = d.discretize_record(&scores(&[("C3", 7.0)])).unwrap_err();
        assert_eq!(
            err,
            RecordError::Discretization {
                document_id: "doc".into(),
                criterion:   "C3".into(),
                value:       7.0,
            }
        );
    }

    #[test]
    fn test_missing_criterion_column() {
        let criteria = vec![three_level("C3"), three_level("C5")];
        let d        = Discretizer::new(&criteria);
        let err      = d.discretize_record(&scores(&[("C3", 1.0)])).unwrap_err();
        assert!(matches!(err, RecordError::MissingCriterion { .. }));
    }

    #[test]
    fn test_extra_columns_ignored() {
        let criteria = vec![CriterionConfig::binary("C1")];
        let d        = Discretizer::new(&criteria);
        let labels   = d.discretize_record(&scores(&[("C1", 1.0), ("uwagi", 3.0)])).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["C1"], 1);
    }

    #[test]
    fn test_rerun_on_discrete_labels_is_noop() {
        let criteria = vec![three_level("C3"), CriterionConfig::binary("C1")];
        let d        = Discretizer::new(&criteria);
        let first    = d.discretize_record(&scores(&[("C3", 4.2), ("C1", 0.7)])).unwrap();
        let second   = d.validate_labels("doc", &first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_discrete_label_rejected() {
        let criteria = vec![CriterionConfig::binary("C1")];
        let d        = Discretizer::new(&criteria);
        let mut labels = BTreeMap::new();
        labels.insert("C1".to_string(), 4u8);
        assert!(d.validate_labels("doc", &labels).is_err());
    }
}
