// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing the records
// that flow through the pipeline:
//
//   ReportRecord  → one report's raw (or cleaned) text
//   ScoreRecord   → one report's raw expert scores
//   LabeledRecord → text joined with discretized labels
//
// plus the per-record error taxonomy and the stage report
// that every stage returns.
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O
//   - Only plain data and the traits other layers implement

/// Report, score and labeled record types
pub mod document;

/// Per-record errors and stage-level counters
pub mod outcome;

/// Core abstractions (traits) that other layers implement
pub mod traits;
