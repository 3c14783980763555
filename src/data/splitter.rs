// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles the labeled records and cuts them into a training
// set and a validation set.
//
// The shuffle is a seeded Fisher-Yates (rand::seq::SliceRandom
// over StdRng), so the same seed and the same input order
// always give the same partition. No stratification: with a
// few hundred reports and seven labels, stratifying on the
// full label vector is not meaningful.
//
// Split sizes: validation = ceil(n * validation_fraction),
// train = the rest.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, validation).
///
/// # Example
/// ```ignore
/// let (train, val) = split_train_val(records, 0.2, 42);
/// // 100 records → 80 train, 20 validation
/// ```
pub fn split_train_val<T>(
    mut samples:         Vec<T>,
    validation_fraction: f64,
    seed:                u64,
) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total     = samples.len();
    // the epsilon keeps 0.1 * 30 = 3.0000000000000004 from rounding up to 4
    let val_count = ((total as f64) * validation_fraction - 1e-9).ceil().max(0.0) as usize;
    let split_at  = total - val_count.min(total);

    // split_off(n) leaves [0..n) in `samples` and returns [n..total)
    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation (seed {})",
        samples.len(),
        val.len(),
        seed,
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.2, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_validation_size_rounds_up() {
        let items: Vec<usize> = (0..11).collect();
        let (train, val)      = split_train_val(items, 0.2, 42);
        assert_eq!(val.len(),   3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let items: Vec<usize> = (0..50).collect();
        let a = split_train_val(items.clone(), 0.2, 7);
        let b = split_train_val(items, 0.2, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seed_different_order() {
        let items: Vec<usize> = (0..50).collect();
        let a = split_train_val(items.clone(), 0.2, 1);
        let b = split_train_val(items, 0.2, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_disjoint_and_exhaustive() {
        let items: Vec<usize> = (0..37).collect();
        let (train, val)      = split_train_val(items, 0.2, 42);
        let t: HashSet<_> = train.iter().copied().collect();
        let v: HashSet<_> = val.iter().copied().collect();
        assert!(t.is_disjoint(&v));
        assert_eq!(train.len() + val.len(), 37);
        assert_eq!(t.union(&v).count(), 37);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val)      = split_train_val(items, 0.2, 42);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }
}
