// ============================================================
// Layer 2 — ConvertUseCase
// ============================================================
// The conversion step, from raw inputs to labeled records:
//
//   Step 1: Normalize the score sheet      (Layer 4 - normalizer)
//   Step 2: Parse and discretize scores    (Layer 4 - loader, discretizer)
//   Step 3: Load the report texts          (Layer 4 - loader)
//   Step 4: Clean the texts                (Layer 4 - preprocessor)
//   Step 5: Join texts with labels         (Layer 4 - merger)
//
// Writes `converted_csv_path`, `cleaned_jsonl_path` and
// `final_jsonl`.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
};

use anyhow::{bail, Context, Result};

use crate::data::{
    discretizer::Discretizer,
    loader::{read_scores, write_jsonl, JsonlSource, TextDirSource},
    merger::merge,
    normalizer::FormatNormalizer,
    preprocessor::Preprocessor,
};
use crate::domain::{
    document::ReportRecord,
    outcome::StageReport,
    traits::DocumentSource,
};
use crate::infra::config::PipelineConfig;

/// What one conversion run produced.
#[derive(Debug)]
pub struct ConvertSummary {
    pub records:        usize,
    pub missing_labels: Vec<String>,
    pub missing_texts:  Vec<String>,
    /// Characters removed by the text cleaner, over all reports
    pub removed_chars:  usize,
    pub report:         StageReport,
}

impl ConvertSummary {
    pub fn mismatch_count(&self) -> usize {
        self.missing_labels.len() + self.missing_texts.len()
    }
}

impl fmt::Display for ConvertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} labeled records ({} documents unmatched; {})",
            self.records,
            self.mismatch_count(),
            self.report
        )
    }
}

pub struct ConvertUseCase<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ConvertUseCase<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Text source chosen by the configuration: a directory of
    /// `.txt` files wins over the raw JSONL export.
    fn source(&self) -> Result<Box<dyn DocumentSource>> {
        let paths = &self.config.paths;
        let src   = &self.config.sources;
        match (&paths.raw_text_dir, &paths.raw_jsonl_path) {
            (Some(dir), _) => Ok(Box::new(TextDirSource::new(dir))),
            (None, Some(path)) => Ok(Box::new(JsonlSource::new(
                path,
                &src.jsonl_id_field,
                &src.jsonl_text_field,
            ))),
            (None, None) => bail!("configure either paths.raw_text_dir or paths.raw_jsonl_path"),
        }
    }

    pub fn execute(&self) -> Result<ConvertSummary> {
        let cfg   = self.config;
        let paths = &cfg.paths;
        let mut report = StageReport::new("conversion");

        // ── Step 1: Normalize the score sheet ─────────────────────────────────
        tracing::info!("Normalizing score sheet '{}'", paths.raw_csv_path.display());
        let raw_csv = fs::read_to_string(&paths.raw_csv_path)
            .with_context(|| format!("Cannot read score sheet '{}'", paths.raw_csv_path.display()))?;
        let normalized = FormatNormalizer::new(&cfg.sources.document_id_column).normalize(&raw_csv)?;
        normalized.report.log();
        write_text(&paths.converted_csv_path, &normalized.text)?;
        report.absorb(normalized.report);

        // ── Step 2: Parse and discretize scores ───────────────────────────────
        let (scores, score_report) = read_scores(&normalized.text, &cfg.sources.document_id_column)?;
        report.absorb(score_report);

        let discretizer = Discretizer::new(&cfg.criteria);
        let labels: Vec<(String, BTreeMap<String, u8>)> = report.collect(
            scores
                .iter()
                .map(|s| discretizer.discretize_record(s).map(|l| (s.document_id.clone(), l)))
                .collect::<Vec<_>>(),
        );
        tracing::info!("Discretized scores of {} documents", labels.len());
        // present in the score sheet but out of every bin
        let rejected: HashSet<String> = {
            let kept: HashSet<&str> = labels.iter().map(|(id, _)| id.as_str()).collect();
            scores
                .iter()
                .filter(|s| !kept.contains(s.document_id.as_str()))
                .map(|s| s.document_id.clone())
                .collect()
        };

        // ── Step 3: Load the report texts ─────────────────────────────────────
        let source = self.source()?;
        tracing::info!("Loading reports from {}", source.describe());
        let raw_reports = source.load_all(&mut report)?;

        // ── Step 4: Clean the texts ───────────────────────────────────────────
        let cleaner = Preprocessor::new();
        let mut removed_chars = 0usize;
        let cleaned: Vec<ReportRecord> = raw_reports
            .into_iter()
            .map(|r| {
                let c = cleaner.clean(&r.text);
                tracing::debug!("Cleaned '{}': removed {} characters", r.document_id, c.removed_chars);
                removed_chars += c.removed_chars;
                ReportRecord::new(r.document_id, c.text)
            })
            .collect();
        write_jsonl(&paths.cleaned_jsonl_path, &cleaned)?;
        tracing::info!(
            "Cleaned {} reports ({} characters removed)",
            cleaned.len(),
            removed_chars
        );

        // ── Step 5: Join texts with labels ────────────────────────────────────
        let merged = merge(cleaned, labels, &rejected);
        let records = merged.records.len();
        report.absorb(merged.report);
        // sub-step counters are summed by absorb; the stage counts records written
        report.processed = records;
        report.ensure_output(records)?;
        write_jsonl(&paths.final_jsonl, &merged.records)?;
        report.log();

        Ok(ConvertSummary {
            records,
            missing_labels: merged.missing_labels,
            missing_texts:  merged.missing_texts,
            removed_chars,
            report,
        })
    }
}

fn write_text(path: &std::path::Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("Cannot write '{}'", path.display()))
}
