// ============================================================
// Layer 5 — Evaluation Metrics
// ============================================================
// Multi-label metrics over sigmoid probabilities, computed on
// the host after each validation pass.
//
// Two decision rules are reported side by side:
//
//   tuned     p ≥ t[c], with t[c] searched per criterion on a
//             0.10 ‥ 0.90 grid to maximise that criterion's F1
//   default   p > 0.5
//
// Primary metric names (`f1_macro`, `f1_micro`, `f1_weighted`,
// `accuracy`, `f1_<criterion>`) use the tuned thresholds; the
// `_default` variants use 0.5. `accuracy` is subset accuracy:
// a row counts only if every criterion is right. F1 of a
// criterion with no predicted and no true positives is 0.
//
// Chunks inherit their report's labels, so the same metrics
// are also computed per report (`doc_*`) after averaging the
// chunk probabilities of each report.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::infra::config::Aggregation;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

const SUMMARY_METRICS: [&str; 13] = [
    "eval_loss",
    "f1_macro",
    "f1_micro",
    "f1_weighted",
    "accuracy",
    "f1_macro_default",
    "f1_micro_default",
    "accuracy_default",
    "f1_macro_improvement",
    "accuracy_improvement",
    "doc_f1_macro",
    "doc_f1_micro",
    "doc_accuracy",
];

const GRID_MIN:  f32   = 0.10;
const GRID_MAX:  f32   = 0.90;
const GRID_STEP: usize = 80; // 0.01 increments

// ─── Predictions ──────────────────────────────────────────────────────────────
/// Row-aligned probabilities, binary targets and owning report ids.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    pub document_ids: Vec<String>,
    pub probs:        Vec<Vec<f32>>,
    pub truth:        Vec<Vec<bool>>,
}

impl Predictions {
    /// Append a batch; `probs` is row-major `[rows, num_labels]`.
    pub fn push_batch(&mut self, document_ids: Vec<String>, probs: &[f32], labels: &[Vec<u8>]) {
        let num_labels = labels.first().map_or(0, Vec::len);
        if num_labels == 0 {
            return;
        }
        for ((doc, row), label_row) in document_ids.into_iter().zip(probs.chunks(num_labels)).zip(labels) {
            self.document_ids.push(doc);
            self.probs.push(row.to_vec());
            self.truth.push(label_row.iter().map(|&y| y > 0).collect());
        }
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// One row per report, in order of first appearance.
    pub fn by_document(&self, method: Aggregation) -> Predictions {
        let mut order: Vec<&str>              = Vec::new();
        let mut index: HashMap<&str, usize>   = HashMap::new();
        let mut rows:  Vec<Vec<&[f32]>>       = Vec::new();
        let mut truth: Vec<Vec<bool>>         = Vec::new();

        for (i, doc) in self.document_ids.iter().enumerate() {
            let slot = *index.entry(doc.as_str()).or_insert_with(|| {
                order.push(doc.as_str());
                rows.push(Vec::new());
                truth.push(self.truth[i].clone());
                rows.len() - 1
            });
            rows[slot].push(&self.probs[i]);
        }

        let probs = rows
            .iter()
            .map(|chunks| {
                let width = chunks.first().map_or(0, |r| r.len());
                (0..width)
                    .map(|c| {
                        let column = chunks.iter().map(|r| r[c]);
                        match method {
                            Aggregation::Mean => column.sum::<f32>() / chunks.len() as f32,
                            Aggregation::Max  => column.fold(f32::MIN, f32::max),
                        }
                    })
                    .collect()
            })
            .collect();

        Predictions {
            document_ids: order.into_iter().map(str::to_string).collect(),
            probs,
            truth,
        }
    }
}

// ─── Scores ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Confusion {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl Confusion {
    fn f1(&self) -> f64 {
        let denom = 2 * self.tp + self.fp + self.fn_;
        if denom == 0 { 0.0 } else { 2.0 * self.tp as f64 / denom as f64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub f1_macro:    f64,
    pub f1_micro:    f64,
    pub f1_weighted: f64,
    pub accuracy:    f64,
    pub per_label:   Vec<f64>,
}

fn decide(p: f32, threshold: Option<f32>) -> bool {
    match threshold {
        Some(t) => p >= t,
        None    => p > DEFAULT_THRESHOLD,
    }
}

fn confusion(preds: &Predictions, label: usize, threshold: Option<f32>) -> Confusion {
    let mut c = Confusion::default();
    for (row, truth) in preds.probs.iter().zip(&preds.truth) {
        match (decide(row[label], threshold), truth[label]) {
            (true, true)   => c.tp  += 1,
            (true, false)  => c.fp  += 1,
            (false, true)  => c.fn_ += 1,
            (false, false) => {}
        }
    }
    c
}

/// Scores under per-label thresholds, or the 0.5 default when `None`.
pub fn score(preds: &Predictions, thresholds: Option<&[f32]>) -> Scores {
    let num_labels = preds.probs.first().map_or(0, Vec::len);
    let threshold  = |c: usize| thresholds.map(|t| t[c]);

    let per_conf: Vec<Confusion> = (0..num_labels)
        .map(|c| confusion(preds, c, threshold(c)))
        .collect();
    let per_label: Vec<f64> = per_conf.iter().map(Confusion::f1).collect();

    let f1_macro = if num_labels == 0 { 0.0 } else { per_label.iter().sum::<f64>() / num_labels as f64 };

    let pooled = per_conf.iter().fold(Confusion::default(), |acc, c| Confusion {
        tp:  acc.tp + c.tp,
        fp:  acc.fp + c.fp,
        fn_: acc.fn_ + c.fn_,
    });

    let supports: Vec<usize> = per_conf.iter().map(|c| c.tp + c.fn_).collect();
    let support_total: usize = supports.iter().sum();
    let f1_weighted = if support_total == 0 {
        0.0
    } else {
        per_label
            .iter()
            .zip(&supports)
            .map(|(f, &s)| f * s as f64)
            .sum::<f64>()
            / support_total as f64
    };

    let exact = preds
        .probs
        .iter()
        .zip(&preds.truth)
        .filter(|(row, truth)| (0..num_labels).all(|c| decide(row[c], threshold(c)) == truth[c]))
        .count();
    let accuracy = if preds.is_empty() { 0.0 } else { exact as f64 / preds.len() as f64 };

    Scores { f1_macro, f1_micro: pooled.f1(), f1_weighted, accuracy, per_label }
}

/// Per-criterion threshold maximising that criterion's F1 on a
/// 0.10 ‥ 0.90 grid. Ties go to the threshold nearest 0.5.
pub fn tune_thresholds(preds: &Predictions) -> Vec<f32> {
    let num_labels = preds.probs.first().map_or(0, Vec::len);

    (0..num_labels)
        .map(|c| {
            let mut best   = DEFAULT_THRESHOLD;
            let mut best_f = confusion(preds, c, Some(best)).f1();
            for i in 0..=GRID_STEP {
                let t = GRID_MIN + (GRID_MAX - GRID_MIN) * i as f32 / GRID_STEP as f32;
                let f = confusion(preds, c, Some(t)).f1();
                let closer = (t - DEFAULT_THRESHOLD).abs() < (best - DEFAULT_THRESHOLD).abs();
                if f > best_f || (f == best_f && closer) {
                    best   = t;
                    best_f = f;
                }
            }
            best
        })
        .collect()
}

// ─── Report ───────────────────────────────────────────────────────────────────
/// Flat metric map plus the thresholds the primary metrics used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metrics:    BTreeMap<String, f64>,
    pub thresholds: Vec<f32>,
}

impl EvaluationReport {
    /// Look up a metric; an `eval_` prefix is accepted and ignored.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let key = name.strip_prefix("eval_").unwrap_or(name);
        self.metrics
            .get(key)
            .or_else(|| self.metrics.get(name))
            .copied()
    }
}

pub fn evaluate(
    preds:       &Predictions,
    criteria:    &[String],
    eval_loss:   f64,
    aggregation: Aggregation,
) -> EvaluationReport {
    let thresholds = tune_thresholds(preds);
    let tuned      = score(preds, Some(&thresholds));
    let default    = score(preds, None);

    let docs       = preds.by_document(aggregation);
    let doc_tuned  = score(&docs, Some(&thresholds));

    let mut m = BTreeMap::new();
    m.insert("eval_loss".to_string(), eval_loss);
    m.insert("f1_macro".to_string(), tuned.f1_macro);
    m.insert("f1_micro".to_string(), tuned.f1_micro);
    m.insert("f1_weighted".to_string(), tuned.f1_weighted);
    m.insert("accuracy".to_string(), tuned.accuracy);
    m.insert("f1_macro_default".to_string(), default.f1_macro);
    m.insert("f1_micro_default".to_string(), default.f1_micro);
    m.insert("accuracy_default".to_string(), default.accuracy);
    m.insert("f1_macro_improvement".to_string(), tuned.f1_macro - default.f1_macro);
    m.insert("accuracy_improvement".to_string(), tuned.accuracy - default.accuracy);
    m.insert("doc_f1_macro".to_string(), doc_tuned.f1_macro);
    m.insert("doc_f1_micro".to_string(), doc_tuned.f1_micro);
    m.insert("doc_accuracy".to_string(), doc_tuned.accuracy);

    for (i, id) in criteria.iter().enumerate() {
        if let (Some(t), Some(d)) = (tuned.per_label.get(i), default.per_label.get(i)) {
            m.insert(format!("f1_{id}"), *t);
            m.insert(format!("f1_{id}_default"), *d);
        }
    }

    for (id, t) in criteria.iter().zip(&thresholds) {
        tracing::debug!("{}: threshold {:.2}", id, t);
    }

    EvaluationReport { metrics: m, thresholds }
}

/// Metric names `evaluate` produces for the given criteria.
pub fn known_metric(name: &str, criteria: &[String]) -> bool {
    let key = name.strip_prefix("eval_").unwrap_or(name);
    SUMMARY_METRICS.contains(&key)
        || name == "eval_loss"
        || criteria
            .iter()
            .any(|id| key == format!("f1_{id}") || key == format!("f1_{id}_default"))
}

/// True when `candidate` beats `best` in the configured direction.
pub fn is_improvement(candidate: f64, best: Option<f64>, greater_is_better: bool) -> bool {
    match best {
        None => candidate.is_finite(),
        Some(b) if greater_is_better => candidate > b,
        Some(b) => candidate < b,
    }
}
