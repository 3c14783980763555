// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that runs tensors lives here, together with the
// metrics computed on the tensors' output.
//
// What's in this layer:
//
//   model.rs      — Transformer encoder with a multi-label head
//                   • Token and positional embeddings
//                   • Post-norm self-attention blocks with a
//                     padding mask
//                   • Masked mean pooling
//                   • One logit per criterion
//                   • Weighted BCE-with-logits loss
//
//   weights.rs    — Positive-class weights per criterion
//                   from training-split label frequencies
//
//   evaluation.rs — Multi-label metrics: F1 macro/micro/
//                   weighted, subset accuracy, per-label F1,
//                   threshold tuning, report-level scores
//
//   trainer.rs    — The `TrainingLoop` seam and its Burn
//                   implementation: AdamW, LR schedule,
//                   gradient accumulation, checkpointing
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Transformer encoder multi-label classifier
pub mod model;

/// Class weights for the loss
pub mod weights;

/// Validation metrics and threshold tuning
pub mod evaluation;

/// Training loop with validation, checkpointing and resume
pub mod trainer;
