// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several other layers:
//
//   config.rs          — PipelineConfig
//                        The single JSON configuration, read
//                        once in `main` and passed by reference
//                        to every stage.
//
//   checkpoint.rs      — Saving and loading training state
//                        Uses Burn's CompactRecorder for model
//                        and optimizer records; writes best/
//                        and the final artifact.
//
//   tokenizer_store.rs — Tokenizer acquisition
//                        Loads tokenizer.json, fetches it from
//                        the hub, or builds a word-level one
//                        from the training split.
//
//   metrics.rs         — Training metrics logging
//                        One CSV row per epoch.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Pipeline configuration file
pub mod config;

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer loading, download and fallback build
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
