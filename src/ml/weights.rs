// ============================================================
// Layer 5 — Class Weights
// ============================================================
// Positive-class weights for the multi-label loss, one per
// criterion, from label frequencies in the training split.
//
// With n training rows and p positives for a criterion
// (positive = discrete label > 0), f = p / n:
//
//   balanced   n / (2·p)
//   sqrt       √(1 / f)
//   log        ln(1 / f)
//   none       1
//
// A criterion with no positives gets weight 1 under every
// method.

use crate::infra::config::ClassWeightMethod;

/// Per-criterion weight with the counts it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassWeight {
    pub positives: usize,
    pub total:     usize,
    pub weight:    f32,
}

pub fn class_weights(
    label_rows: &[Vec<u8>],
    num_labels: usize,
    method:     ClassWeightMethod,
) -> Vec<ClassWeight> {
    let total = label_rows.len();

    (0..num_labels)
        .map(|i| {
            let positives = label_rows
                .iter()
                .filter(|row| row.get(i).is_some_and(|&y| y > 0))
                .count();

            let weight = if positives == 0 {
                1.0
            } else {
                let n = total as f64;
                let p = positives as f64;
                match method {
                    ClassWeightMethod::Balanced => n / (2.0 * p),
                    ClassWeightMethod::Sqrt     => (n / p).sqrt(),
                    ClassWeightMethod::Log      => (n / p).ln(),
                    ClassWeightMethod::None     => 1.0,
                }
            };

            ClassWeight { positives, total, weight: weight as f32 }
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<u8>> {
        // criterion 0: 1 of 4 positive; criterion 1: none; criterion 2: 3-level, 2 positive
        vec![vec![1, 0, 2], vec![0, 0, 0], vec![0, 0, 1], vec![0, 0, 0]]
    }

    #[test]
    fn test_balanced() {
        let w = class_weights(&rows(), 3, ClassWeightMethod::Balanced);
        assert_eq!(w[0].weight, 2.0);
        assert_eq!(w[0].positives, 1);
        assert_eq!(w[1].weight, 1.0);
        assert_eq!(w[2].weight, 1.0);
    }

    #[test]
    fn test_sqrt_and_log() {
        let s = class_weights(&rows(), 3, ClassWeightMethod::Sqrt);
        assert!((s[0].weight - 2.0).abs() < 1e-6);
        let l = class_weights(&rows(), 3, ClassWeightMethod::Log);
        assert!((l[0].weight - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_none_is_all_ones() {
        let w = class_weights(&rows(), 3, ClassWeightMethod::None);
        assert!(w.iter().all(|c| c.weight == 1.0));
    }
}
