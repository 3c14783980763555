// ============================================================
// Layer 4 — Token Window Chunker
// ============================================================
// Splits one tokenised report into fixed-size overlapping
// windows that fit the encoder's context.
//
// Reports run to tens of thousands of tokens; the encoder sees
// L = 4096 at a time. Windows advance by the stride
// S = L - overlap (3584 with the default 512-token overlap):
//
//   T = 5000, L = 4096, S = 3584
//
//   right_aligned:  [0, 4096)  [904, 5000)
//   padded:         [0, 4096)  [3584, 5000) + 2680 pad
//
// Rules:
//   - T ≤ L → one window [0, T), padded to L
//   - strided windows are taken while start + L < T
//   - the last window ends exactly at T; the tail policy only
//     decides whether it is right-aligned or padded
//   - when a strided window already ends at T (T = L + kS) no
//     extra tail window is produced
//
// With special tokens, each chunk is `<s> content </s>`: the
// windows above are laid over L - 2 content tokens and the
// stride is (L - 2) - overlap, as overflowing-token encoders do.
//
// Every window copies the document's full label vector. The
// model is trained as if each chunk carried the whole-report
// label, so predictions must be aggregated per document again
// at evaluation time (see `aggregate_labels` here and
// `ml::evaluation` for probabilities).

use std::collections::BTreeMap;

use anyhow::{ensure, Result};

use crate::data::dataset::ChunkRecord;
use crate::domain::outcome::RecordError;
use crate::infra::config::TailPolicy;

/// Half-open token range `[start, end)` of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end:   usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

pub struct Chunker {
    /// Tokens per chunk record (L)
    window:   usize,
    /// Document tokens per window (L, or L - 2 with specials)
    content:  usize,
    overlap:  usize,
    /// Advance between window starts (content - overlap)
    stride:   usize,
    tail:     TailPolicy,
    pad_id:   u32,
    /// (bos, eos) wrapped around every window
    specials: Option<(u32, u32)>,
}

impl Chunker {
    /// Create a new Chunker.
    ///
    /// Fails when `overlap >= window`, since the stride would be zero.
    pub fn new(window: usize, overlap: usize, tail: TailPolicy, pad_id: u32) -> Result<Self> {
        ensure!(window > 0, "window length must be positive");
        ensure!(
            overlap < window,
            "overlap ({overlap}) must be less than window length ({window})"
        );
        Ok(Self {
            window,
            content: window,
            overlap,
            stride: window - overlap,
            tail,
            pad_id,
            specials: None,
        })
    }

    /// Wrap every window in `bos … eos`, leaving L - 2 content tokens.
    pub fn with_special_tokens(mut self, bos: u32, eos: u32) -> Result<Self> {
        let content = self.window.saturating_sub(2);
        ensure!(
            self.overlap < content,
            "overlap ({}) must be less than the {} content tokens left beside <s> and </s>",
            self.overlap,
            content
        );
        self.content  = content;
        self.stride   = content - self.overlap;
        self.specials = Some((bos, eos));
        Ok(self)
    }

    /// Window layout for a document of `token_count` tokens.
    pub fn windows(&self, token_count: usize) -> Vec<Window> {
        if token_count == 0 {
            return Vec::new();
        }
        let window = self.content;
        if token_count <= window {
            return vec![Window { start: 0, end: token_count }];
        }

        let mut windows = Vec::new();
        let mut start   = 0usize;

        loop {
            if start + window < token_count {
                windows.push(Window { start, end: start + window });
                start += self.stride;
                continue;
            }

            // This window reaches the end of the document
            let tail = if start + window == token_count {
                Window { start, end: token_count }
            } else {
                match self.tail {
                    TailPolicy::Padded => Window { start, end: token_count },
                    TailPolicy::RightAligned => Window {
                        start: token_count - window,
                        end:   token_count,
                    },
                }
            };
            windows.push(tail);
            break;
        }

        windows
    }

    /// Cut one document into padded chunk records.
    ///
    /// An empty token sequence is an error for this document.
    pub fn chunk(
        &self,
        document_id: &str,
        tokens:      &[u32],
        labels:      &[u8],
    ) -> std::result::Result<Vec<ChunkRecord>, RecordError> {
        if tokens.is_empty() {
            return Err(RecordError::Tokenization {
                document_id: document_id.to_string(),
                reason:      "tokenization produced zero tokens".to_string(),
            });
        }

        let chunks = self
            .windows(tokens.len())
            .into_iter()
            .enumerate()
            .map(|(index, w)| {
                let mut input_ids = Vec::with_capacity(self.window);
                match self.specials {
                    Some((bos, eos)) => {
                        input_ids.push(bos);
                        input_ids.extend_from_slice(&tokens[w.start..w.end]);
                        input_ids.push(eos);
                    }
                    None => input_ids.extend_from_slice(&tokens[w.start..w.end]),
                }
                let mut attention_mask = vec![1u8; input_ids.len()];

                // Pad both to the window length; padding is masked out
                input_ids.resize(self.window, self.pad_id);
                attention_mask.resize(self.window, 0);

                ChunkRecord {
                    chunk_id:     format!("{document_id}#{index:04}"),
                    document_id:  document_id.to_string(),
                    token_offset: w.start,
                    input_ids,
                    attention_mask,
                    labels:       labels.to_vec(),
                }
            })
            .collect();

        Ok(chunks)
    }
}

/// Recover one label vector per document from its chunks by
/// per-criterion majority vote (ties go to the smaller label).
pub fn aggregate_labels(chunks: &[ChunkRecord]) -> BTreeMap<String, Vec<u8>> {
    let mut grouped: BTreeMap<String, Vec<&[u8]>> = BTreeMap::new();
    for c in chunks {
        grouped.entry(c.document_id.clone()).or_default().push(&c.labels);
    }

    grouped
        .into_iter()
        .map(|(doc, vectors)| {
            let width = vectors.iter().map(|v| v.len()).max().unwrap_or(0);
            let voted = (0..width)
                .map(|i| {
                    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
                    for v in &vectors {
                        if let Some(&label) = v.get(i) {
                            *counts.entry(label).or_insert(0) += 1;
                        }
                    }
                    // max_by_key keeps the last maximum, so walk labels high → low
                    counts
                        .into_iter()
                        .rev()
                        .max_by_key(|&(_, n)| n)
                        .map(|(label, _)| label)
                        .unwrap_or(0)
                })
                .collect();
            (doc, voted)
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const L: usize = 4096;
    const O: usize = 512;

    fn chunker(tail: TailPolicy) -> Chunker {
        Chunker::new(L, O, tail, 1).unwrap()
    }

    fn starts(ws: &[Window]) -> Vec<usize> {
        ws.iter().map(|w| w.start).collect()
    }

    fn tokens(n: usize) -> Vec<u32> {
        (0..n as u32).map(|i| i + 10).collect()
    }

    #[test]
    fn test_short_document_gives_one_padded_chunk() {
        let c      = chunker(TailPolicy::RightAligned);
        let chunks = c.chunk("doc", &tokens(100), &[1, 0]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].input_ids.len(), L);
        assert_eq!(chunks[0].attention_mask.iter().filter(|&&m| m == 1).count(), 100);
        assert_eq!(chunks[0].input_ids[100], 1);
        assert_eq!(chunks[0].attention_mask[99], 1);
        assert_eq!(chunks[0].attention_mask[100], 0);
    }

    #[test]
    fn test_exactly_window_length_is_one_chunk() {
        let c = chunker(TailPolicy::RightAligned);
        assert_eq!(c.windows(L), vec![Window { start: 0, end: L }]);
    }

    #[test]
    fn test_5000_tokens_right_aligned() {
        let ws = chunker(TailPolicy::RightAligned).windows(5000);
        assert_eq!(starts(&ws), vec![0, 904]);
        assert_eq!(ws.last().unwrap().end, 5000);
        assert!(ws.iter().all(|w| w.len() == L));
    }

    #[test]
    fn test_5000_tokens_padded() {
        let c  = chunker(TailPolicy::Padded);
        let ws = c.windows(5000);
        assert_eq!(starts(&ws), vec![0, 3584]);
        assert_eq!(ws[1], Window { start: 3584, end: 5000 });

        let chunks = c.chunk("doc", &tokens(5000), &[1]).unwrap();
        assert_eq!(chunks[1].attention_mask.iter().filter(|&&m| m == 1).count(), 5000 - 3584);
    }

    #[test]
    fn test_exact_stride_fit_has_no_duplicate_tail() {
        // T = L + S: the second strided window ends exactly at T
        let t = L + (L - O);
        for tail in [TailPolicy::RightAligned, TailPolicy::Padded] {
            let ws = chunker(tail).windows(t);
            assert_eq!(starts(&ws), vec![0, L - O]);
            assert_eq!(ws.last().unwrap().end, t);
        }
    }

    #[test]
    fn test_long_document_invariants() {
        for tail in [TailPolicy::RightAligned, TailPolicy::Padded] {
            let c = chunker(tail);
            for t in [4097, 7679, 7680, 7681, 12_000, 40_000] {
                let ws = c.windows(t);
                assert!(ws.windows(2).all(|p| p[0].start < p[1].start), "t={t}");
                assert_eq!(ws.last().unwrap().end, t, "t={t}");
                assert!(ws.iter().all(|w| w.len() <= L));
                // consecutive windows overlap or touch, so every token is covered
                assert!(ws.windows(2).all(|p| p[1].start <= p[0].end), "t={t}");
            }
        }
    }

    #[test]
    fn test_small_window_walkthrough() {
        // L=4, overlap=2 → S=2; 7 tokens
        let c = Chunker::new(4, 2, TailPolicy::RightAligned, 0).unwrap();
        assert_eq!(starts(&c.windows(7)), vec![0, 2, 3]);
        let c = Chunker::new(4, 2, TailPolicy::Padded, 0).unwrap();
        assert_eq!(starts(&c.windows(7)), vec![0, 2, 4]);
        assert_eq!(c.windows(6).len(), 2);
    }

    #[test]
    fn test_every_chunk_carries_document_labels() {
        let labels = [1u8, 0, 2, 1];
        let chunks = chunker(TailPolicy::RightAligned)
            .chunk("raport-7", &tokens(12_000), &labels)
            .unwrap();
        assert!(chunks.len() > 1);
        for (i, ch) in chunks.iter().enumerate() {
            assert_eq!(ch.labels, labels);
            assert_eq!(ch.document_id, "raport-7");
            assert_eq!(ch.chunk_id, format!("raport-7#{i:04}"));
        }
        assert_eq!(chunks[1].input_ids[0], 10 + (L - O) as u32);

        let recovered = aggregate_labels(&chunks);
        assert_eq!(recovered["raport-7"], labels.to_vec());
    }

    #[test]
    fn test_empty_tokenization_is_error() {
        let err = chunker(TailPolicy::RightAligned).chunk("d", &[], &[1]).unwrap_err();
        assert!(matches!(err, RecordError::Tokenization { .. }));
    }

    #[test]
    fn test_overlap_must_be_less_than_window() {
        assert!(Chunker::new(5, 5, TailPolicy::Padded, 0).is_err());
    }

    #[test]
    fn test_special_tokens_wrap_each_window() {
        // L=8 → 6 content tokens, overlap 2 → stride 4; 13 tokens
        let c = Chunker::new(8, 2, TailPolicy::RightAligned, 1)
            .unwrap()
            .with_special_tokens(0, 2)
            .unwrap();
        let ws = c.windows(13);
        assert_eq!(starts(&ws), vec![0, 4, 7]);
        assert!(ws.iter().all(|w| w.len() == 6));

        let chunks = c.chunk("d", &tokens(13), &[1]).unwrap();
        assert_eq!(chunks[0].input_ids, vec![0, 10, 11, 12, 13, 14, 15, 2]);
        assert_eq!(chunks[2].input_ids, vec![0, 17, 18, 19, 20, 21, 22, 2]);
        assert_eq!(chunks[2].token_offset, 7);

        // short document: <s> a b c </s> then padding
        let short = c.chunk("s", &tokens(3), &[0]).unwrap();
        assert_eq!(short[0].input_ids, vec![0, 10, 11, 12, 2, 1, 1, 1]);
        assert_eq!(short[0].attention_mask, vec![1, 1, 1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_special_tokens_need_room_for_overlap() {
        let c = Chunker::new(6, 4, TailPolicy::Padded, 0).unwrap();
        assert!(c.with_special_tokens(0, 2).is_err());
    }

    #[test]
    fn test_aggregate_majority_tie_goes_low() {
        let mk = |labels: Vec<u8>| ChunkRecord {
            chunk_id:       String::new(),
            document_id:    "d".into(),
            token_offset:   0,
            input_ids:      vec![],
            attention_mask: vec![],
            labels,
        };
        let out = aggregate_labels(&[mk(vec![1, 2]), mk(vec![0, 2]), mk(vec![1, 0]), mk(vec![0, 1])]);
        assert_eq!(out["d"], vec![0, 2]);
    }
}
