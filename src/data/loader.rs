// ============================================================
// Layer 4 — Record Loaders
// ============================================================
// Reads the two raw inputs and the JSONL intermediates.
//
// Report texts come from one of two sources:
//
//   TextDirSource  one `<document_id>.txt` per report
//   JsonlSource    one JSON object per line with configurable
//                  id and text fields, e.g.
//                  {"nazwa_raportu": "Orlen 2023", "text": "..."}
//
// Both implement the DocumentSource trait from Layer 3, so the
// conversion use case does not care which one is configured.
// A file or line that cannot be read is recorded and skipped;
// only a missing source is an error.
//
// Expert scores come from the normalized (comma, dot-decimal)
// score sheet produced by the FormatNormalizer.

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::document::{ReportRecord, ScoreRecord};
use crate::domain::outcome::{RecordError, StageReport};
use crate::domain::traits::DocumentSource;

// ─── TextDirSource ────────────────────────────────────────────────────────────
pub struct TextDirSource {
    dir: PathBuf,
}

impl TextDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DocumentSource for TextDirSource {
    fn load_all(&self, report: &mut StageReport) -> Result<Vec<ReportRecord>> {
        if !self.dir.is_dir() {
            bail!("Report directory '{}' does not exist", self.dir.display());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot read directory '{}'", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();
        // read_dir order is platform dependent
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                report.fail(RecordError::Unreadable {
                    path:   path.display().to_string(),
                    reason: "file name is not valid UTF-8".into(),
                });
                continue;
            };

            match fs::read_to_string(&path) {
                Ok(text) => {
                    tracing::debug!("Loaded: {} ({} chars)", stem, text.len());
                    records.push(ReportRecord::new(stem, text));
                }
                Err(e) => report.fail(RecordError::Unreadable {
                    path:   path.display().to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        tracing::info!("Loaded {} reports from '{}'", records.len(), self.dir.display());
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("text directory '{}'", self.dir.display())
    }
}

// ─── JsonlSource ──────────────────────────────────────────────────────────────
pub struct JsonlSource {
    path:       PathBuf,
    id_field:   String,
    text_field: String,
}

impl JsonlSource {
    pub fn new(
        path:       impl Into<PathBuf>,
        id_field:   impl Into<String>,
        text_field: impl Into<String>,
    ) -> Self {
        Self { path: path.into(), id_field: id_field.into(), text_field: text_field.into() }
    }

    fn parse_line(&self, line: &str, number: usize) -> std::result::Result<ReportRecord, RecordError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| RecordError::Format { line: number, reason: e.to_string() })?;

        let field = |name: &str| -> std::result::Result<String, RecordError> {
            match value.get(name) {
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                // numeric ids appear in some exports
                Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
                _ => Err(RecordError::Format {
                    line:   number,
                    reason: format!("missing string field '{name}'"),
                }),
            }
        };

        Ok(ReportRecord::new(field(&self.id_field)?, field(&self.text_field)?))
    }
}

impl DocumentSource for JsonlSource {
    fn load_all(&self, report: &mut StageReport) -> Result<Vec<ReportRecord>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open report file '{}'", self.path.display()))?;

        let outcomes = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let number = index + 1;
                match line {
                    Ok(l) if l.trim().is_empty() => None,
                    Ok(l) => Some(self.parse_line(&l, number)),
                    Err(e) => Some(Err(RecordError::Format { line: number, reason: e.to_string() })),
                }
            })
            .collect::<Vec<_>>();

        let records = report.collect(outcomes);

        tracing::info!("Loaded {} reports from '{}'", records.len(), self.path.display());
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("JSONL file '{}'", self.path.display())
    }
}

// ─── Score sheet ──────────────────────────────────────────────────────────────
/// Parse the normalized score sheet into one ScoreRecord per row.
pub fn read_scores(csv_text: &str, id_column: &str) -> Result<(Vec<ScoreRecord>, StageReport)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Cannot read score sheet header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let id_index = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| anyhow!("Score sheet has no '{id_column}' column"))?;

    let mut report = StageReport::new("scores");
    let outcomes = reader.records().enumerate().map(|(index, row)| -> std::result::Result<ScoreRecord, RecordError> {
        let line = index + 2;
        let row  = row.map_err(|e| RecordError::Format { line, reason: e.to_string() })?;

        let mut scores = std::collections::BTreeMap::new();
        for (col, raw) in row.iter().enumerate() {
            if col == id_index {
                continue;
            }
            let value = raw.trim().parse::<f64>().map_err(|_| RecordError::Data {
                line,
                column: headers[col].clone(),
                value:  raw.to_string(),
            })?;
            scores.insert(headers[col].clone(), value);
        }
        Ok(ScoreRecord::new(&row[id_index], scores))
    });

    let records = report.collect(outcomes.collect::<Vec<_>>());
    Ok((records, report))
}

// ─── JSONL helpers ────────────────────────────────────────────────────────────
/// Read every line of a JSONL file as `T`; bad lines go into `report`.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path, report: &mut StageReport) -> Result<Vec<T>> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open '{}'", path.display()))?;

    let outcomes = BufReader::new(file)
        .lines()
        .enumerate()
        .filter_map(|(index, line)| match line {
            Ok(l) if l.trim().is_empty() => None,
            Ok(l) => Some(
                serde_json::from_str::<T>(&l)
                    .map_err(|e| RecordError::Format { line: index + 1, reason: e.to_string() }),
            ),
            Err(e) => Some(Err(RecordError::Format { line: index + 1, reason: e.to_string() })),
        })
        .collect::<Vec<_>>();

    Ok(report.collect(outcomes))
}

/// Write `items` as JSONL, replacing the file.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut out = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.write_all(b"\n")?;
    }
    out.flush()
        .with_context(|| format!("Cannot write '{}'", path.display()))
}
