// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer only sees these traits, never the
// concrete readers behind them:
//
//   DocumentSource → TextDirSource  (one .txt file per report)
//                  → JsonlSource    (raw JSONL export)
//
// The training-loop seam lives in Layer 5 (`ml::trainer`)
// because its job description involves Burn types.

use anyhow::Result;

use crate::domain::document::ReportRecord;
use crate::domain::outcome::StageReport;

// ─── DocumentSource ───────────────────────────────────────────────────────────
/// Any component that can produce the raw report texts.
pub trait DocumentSource {
    /// Load every readable report. Unreadable entries are recorded
    /// in `report` and skipped; only source-level problems (missing
    /// directory, unreadable file) are returned as errors.
    fn load_all(&self, report: &mut StageReport) -> Result<Vec<ReportRecord>>;

    /// Short human-readable description for log lines.
    fn describe(&self) -> String;
}
