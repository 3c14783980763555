// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers, one use case per
// pipeline stage, plus the pipeline that runs them in order.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1); use cases return
//     summaries the CLI prints
//   - Stage outputs are written through Layer 4 / Layer 6
//     helpers only
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Ordered execution of the stages, reuse and force-clean
pub mod pipeline;

// Raw CSV + texts → labeled JSONL
pub mod convert_use_case;

// Labeled JSONL → train / validation split
pub mod dataset_use_case;

// Tokenizer acquisition
pub mod download_use_case;

// Split → tokenized, chunked dataset
pub mod tokenize_use_case;

// The training workflow
pub mod train_use_case;
