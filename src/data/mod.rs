// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from the raw score sheet and
// report texts all the way to tensor batches.
//
// The pipeline flows in this order:
//
//   score sheet (;-CSV)          report texts (.txt / JSONL)
//       │                              │
//       ▼                              ▼
//   FormatNormalizer              loader (DocumentSource)
//       │                              │
//       ▼                              ▼
//   Discretizer                   Preprocessor
//       │                              │
//       └──────────────┬───────────────┘
//                      ▼
//                   merger         → LabeledRecord per report
//                      │
//                      ▼
//                   splitter       → train / validation
//                      │
//                      ▼
//   Tokenizer + Chunker            → ChunkRecord windows
//                      │
//                      ▼
//   ChunkDataset + ChunkBatcher    → DataLoader batches
//
// Each module is responsible for exactly one step.

/// Semicolon/comma-decimal CSV → comma/dot-decimal CSV
pub mod normalizer;

/// Markup and artifact removal for report text
pub mod preprocessor;

/// Raw expert scores → discrete labels via configured bins
pub mod discretizer;

/// Inner join of texts and labels on document id
pub mod merger;

/// Report sources, score sheet reader and JSONL helpers
pub mod loader;

/// Seeded train/validation split
pub mod splitter;

/// Overlapping token windows over long reports
pub mod chunker;

/// Chunk records, on-disk layouts and Burn's Dataset trait
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
