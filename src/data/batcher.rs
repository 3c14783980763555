// ============================================================
// Layer 4 — Chunk Batcher
// ============================================================
// Implements Burn's Batcher trait to stack ChunkRecords into
// tensors for the classifier.
//
//   Input:  Vec of N ChunkRecords, each with L token ids
//   Output: ChunkBatch
//             input_ids       [N, L]  Int
//             attention_mask  [N, L]  Int
//             targets         [N, C]  Float (1.0 when label > 0)
//
// Chunks are already padded to L by the chunker, so the token
// rows are flattened and reshaped without dynamic padding.
// The raw label rows and document ids ride along for
// document-level evaluation.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::ChunkRecord;

#[derive(Debug, Clone)]
pub struct ChunkBatch<B: Backend> {
    pub input_ids:      Tensor<B, 2, Int>,
    pub attention_mask: Tensor<B, 2, Int>,
    /// Binary multi-label targets
    pub targets:        Tensor<B, 2>,
    pub labels:         Vec<Vec<u8>>,
    pub document_ids:   Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ChunkBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ChunkBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ChunkRecord, ChunkBatch<B>> for ChunkBatcher<B> {
    fn batch(&self, items: Vec<ChunkRecord>) -> ChunkBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();
        let num_labels = items[0].labels.len();

        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|c| c.input_ids.iter().map(|&x| x as i32))
            .collect();

        let mask_flat: Vec<i32> = items
            .iter()
            .flat_map(|c| c.attention_mask.iter().map(|&x| i32::from(x)))
            .collect();

        let target_flat: Vec<f32> = items
            .iter()
            .flat_map(|c| c.labels.iter().map(|&y| if y > 0 { 1.0 } else { 0.0 }))
            .collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(
            input_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        let attention_mask = Tensor::<B, 1, Int>::from_ints(
            mask_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(target_flat, [batch_size, num_labels]),
            &self.device,
        );

        let (labels, document_ids) = items
            .into_iter()
            .map(|c| (c.labels, c.document_id))
            .unzip();

        ChunkBatch { input_ids, attention_mask, targets, labels, document_ids }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn chunk(doc: &str, labels: Vec<u8>) -> ChunkRecord {
        ChunkRecord {
            chunk_id:       format!("{doc}#0000"),
            document_id:    doc.into(),
            token_offset:   0,
            input_ids:      vec![7, 8, 9, 1],
            attention_mask: vec![1, 1, 1, 0],
            labels,
        }
    }

    #[test]
    fn test_batch_shapes_and_binary_targets() {
        let batcher = ChunkBatcher::<NdArray>::new(Default::default());
        let batch   = batcher.batch(vec![chunk("a", vec![0, 2, 1]), chunk("b", vec![1, 0, 0])]);

        assert_eq!(batch.input_ids.dims(), [2, 4]);
        assert_eq!(batch.attention_mask.dims(), [2, 4]);
        assert_eq!(batch.targets.dims(), [2, 3]);

        let targets: Vec<f32> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(batch.document_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(batch.labels[0], vec![0, 2, 1]);
    }
}
