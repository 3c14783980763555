// ============================================================
// Layer 4 — Merger
// ============================================================
// Inner join of cleaned report texts with discretized label
// maps on `document_id`.
//
//   texts:  A B C          labels: A C D
//   output: A C            unmatched: B (no labels), D (no text)
//
// Reports whose scores exist but were rejected upstream (a
// discretization failure) are already counted there; they are
// left out without being reported as unmatched.
//
// Unmatched documents are never given placeholder labels.
// They are excluded and listed so the loss is visible in the
// stage summary. Output keeps the order of the text source.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::document::{LabeledRecord, ReportRecord};
use crate::domain::outcome::{RecordError, StageReport};

/// Join result plus the ids that fell out on each side.
#[derive(Debug)]
pub struct MergeOutcome {
    pub records:          Vec<LabeledRecord>,
    /// Reports with text but no label row
    pub missing_labels:   Vec<String>,
    /// Label rows with no report text
    pub missing_texts:    Vec<String>,
    pub report:           StageReport,
}

impl MergeOutcome {
    /// Documents excluded because they were present in one source only.
    pub fn mismatch_count(&self) -> usize {
        self.missing_labels.len() + self.missing_texts.len()
    }
}

pub fn merge(
    reports:  Vec<ReportRecord>,
    labels:   Vec<(String, BTreeMap<String, u8>)>,
    rejected: &HashSet<String>,
) -> MergeOutcome {
    let mut report = StageReport::new("merge");

    // First label row wins for duplicated ids
    let mut by_id: HashMap<String, BTreeMap<String, u8>> = HashMap::with_capacity(labels.len());
    let mut label_order = Vec::with_capacity(labels.len());
    for (id, map) in labels {
        if by_id.contains_key(&id) {
            tracing::warn!("Duplicate label row for '{}', keeping the first", id);
            report.skipped += 1;
            continue;
        }
        label_order.push(id.clone());
        by_id.insert(id, map);
    }

    let mut records        = Vec::with_capacity(reports.len());
    let mut missing_labels = Vec::new();
    let mut seen_texts     = HashSet::new();

    for rec in reports {
        if !seen_texts.insert(rec.document_id.clone()) {
            tracing::warn!("Duplicate report text for '{}', keeping the first", rec.document_id);
            report.skipped += 1;
            continue;
        }
        match by_id.get(&rec.document_id) {
            Some(map) => {
                records.push(LabeledRecord {
                    document_id: rec.document_id,
                    text:        rec.text,
                    labels:      map.clone(),
                });
                report.processed += 1;
            }
            None if rejected.contains(&rec.document_id) => {
                tracing::debug!("'{}' has rejected scores, leaving it out", rec.document_id);
                report.skipped += 1;
            }
            None => {
                report.fail(RecordError::Unmatched {
                    document_id:  rec.document_id.clone(),
                    missing_from: "label",
                });
                missing_labels.push(rec.document_id);
            }
        }
    }

    let missing_texts: Vec<String> = label_order
        .into_iter()
        .filter(|id| !seen_texts.contains(id))
        .collect();
    for id in &missing_texts {
        report.fail(RecordError::Unmatched {
            document_id:  id.clone(),
            missing_from: "text",
        });
    }

    tracing::info!(
        "Merged {} records; {} without labels, {} without text",
        records.len(),
        missing_labels.len(),
        missing_texts.len()
    );

    MergeOutcome { records, missing_labels, missing_texts, report }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn labels_for(id: &str, v: u8) -> (String, BTreeMap<String, u8>) {
        let mut m = BTreeMap::new();
        m.insert("C1".to_string(), v);
        (id.to_string(), m)
    }

    #[test]
    fn test_three_docs_one_unlabeled() {
        let reports = vec![
            ReportRecord::new("A", "tekst a"),
            ReportRecord::new("B", "tekst b"),
            ReportRecord::new("C", "tekst c"),
        ];
        let labels = vec![labels_for("A", 1), labels_for("C", 0)];

        let out = merge(reports, labels, &HashSet::new());
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.mismatch_count(), 1);
        assert_eq!(out.missing_labels, vec!["B".to_string()]);
        assert_eq!(out.records[0].document_id, "A");
        assert_eq!(out.records[1].labels["C1"], 0);
    }

    #[test]
    fn test_labels_without_text_counted() {
        let reports = vec![ReportRecord::new("A", "a")];
        let labels  = vec![labels_for("A", 1), labels_for("Z", 1)];
        let out     = merge(reports, labels, &HashSet::new());
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.missing_texts, vec!["Z".to_string()]);
        assert_eq!(out.report.failed(), 1);
    }

    #[test]
    fn test_rejected_scores_are_not_unmatched() {
        let reports  = vec![ReportRecord::new("A", "a"), ReportRecord::new("C", "c")];
        let labels   = vec![labels_for("A", 1)];
        let rejected = HashSet::from(["C".to_string()]);
        let out      = merge(reports, labels, &rejected);
        assert_eq!(out.records.len(), 1);
        assert!(out.missing_labels.is_empty());
        assert_eq!(out.mismatch_count(), 0);
        assert_eq!(out.report.failed(), 0);
        assert_eq!(out.report.skipped, 1);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let reports = vec![ReportRecord::new("A", "first"), ReportRecord::new("A", "second")];
        let labels  = vec![labels_for("A", 1), labels_for("A", 0)];
        let out     = merge(reports, labels, &HashSet::new());
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].text, "first");
        assert_eq!(out.records[0].labels["C1"], 1);
        assert_eq!(out.report.skipped, 2);
    }
}
