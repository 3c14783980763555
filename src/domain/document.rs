// ============================================================
// Layer 3 — Record Domain Types
// ============================================================
// The three record shapes of the data-preparation half of the
// pipeline. All of them are keyed by `document_id`, which is
// the report name used both as the text file stem and as the
// first column of the expert score sheet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One report's text, as read from a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Report identifier (file stem or `nazwa_raportu` field)
    pub document_id: String,

    /// Full report text
    pub text: String,
}

impl ReportRecord {
    /// Create a new record. Leading/trailing whitespace around the
    /// identifier is dropped so joins are not defeated by padding.
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into().trim().to_string(),
            text:        text.into(),
        }
    }
}

/// Raw expert scores of one report, keyed by criterion id.
/// Scales differ per criterion (binary, 3-level, 5-level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub document_id: String,
    pub scores:      BTreeMap<String, f64>,
}

impl ScoreRecord {
    pub fn new(document_id: impl Into<String>, scores: BTreeMap<String, f64>) -> Self {
        Self {
            document_id: document_id.into().trim().to_string(),
            scores,
        }
    }
}

/// Text joined with its discretized per-criterion labels.
///
/// This is the JSONL intermediate format:
/// `{"document_id": "...", "text": "...", "labels": {"C1": 1, ...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub document_id: String,
    pub text:        String,
    pub labels:      BTreeMap<String, u8>,
}

impl LabeledRecord {
    /// Label values in the given criterion order.
    ///
    /// Criteria missing from the map yield `None` so callers can
    /// surface the gap instead of guessing a value.
    pub fn label_vector(&self, criteria: &[String]) -> Option<Vec<u8>> {
        criteria
            .iter()
            .map(|id| self.labels.get(id).copied())
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_trimmed() {
        let r = ReportRecord::new("  Orlen 2023 ", "text");
        assert_eq!(r.document_id, "Orlen 2023");
    }

    #[test]
    fn test_label_vector_follows_criteria_order() {
        let mut labels = BTreeMap::new();
        labels.insert("C10".to_string(), 1);
        labels.insert("C2".to_string(),  0);
        labels.insert("C1".to_string(),  2);
        let rec = LabeledRecord { document_id: "d".into(), text: "t".into(), labels };

        let order = vec!["C1".to_string(), "C2".to_string(), "C10".to_string()];
        assert_eq!(rec.label_vector(&order), Some(vec![2, 0, 1]));
    }

    #[test]
    fn test_label_vector_missing_criterion() {
        let rec = LabeledRecord {
            document_id: "d".into(),
            text:        "t".into(),
            labels:      BTreeMap::new(),
        };
        assert_eq!(rec.label_vector(&["C1".to_string()]), None);
    }
}
