// ============================================================
// Layer 4 — CSV Format Normalizer
// ============================================================
// The expert score sheet is exported from a Polish spreadsheet:
//
//   Raport;C1;C2;C3
//   Orlen 2023;1;0,5;3
//
// i.e. `;` between fields and `,` as the decimal separator.
// This module rewrites it into a plain comma CSV with dot
// decimals:
//
//   Raport,C1,C2,C3
//   Orlen 2023,1,0.5,3
//
// Rules:
//   - the delimiter is sniffed from the header line, so running
//     the normalizer on its own output changes nothing
//   - a row whose field count differs from the header is
//     rejected (format error) and the run continues
//   - every column except the document-id column must parse as
//     a number after `,` → `.`; failures reject the row (data
//     error), values are never coerced or re-formatted

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Terminator, WriterBuilder};

use crate::domain::outcome::{RecordError, StageReport};

/// Output of one normalization pass.
#[derive(Debug)]
pub struct NormalizedCsv {
    pub text:   String,
    pub report: StageReport,
}

pub struct FormatNormalizer {
    /// Header of the non-numeric identifier column
    id_column: String,
}

impl FormatNormalizer {
    pub fn new(id_column: impl Into<String>) -> Self {
        Self { id_column: id_column.into() }
    }

    /// Rewrite `input` into comma/dot CSV.
    ///
    /// Returns an error only when the sheet as a whole is unusable
    /// (no header, no id column); bad rows go into the report.
    pub fn normalize(&self, input: &str) -> Result<NormalizedCsv> {
        let input  = input.trim_start_matches('\u{FEFF}');
        let header = input
            .lines()
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow!("CSV input is empty"))?;
        let delimiter = detect_delimiter(header);

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(input.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .context("Cannot read CSV header")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let id_index = headers
            .iter()
            .position(|h| h == &self.id_column)
            .ok_or_else(|| anyhow!("CSV header has no '{}' column: {:?}", self.id_column, headers))?;

        let mut writer = WriterBuilder::new()
            .delimiter(b',')
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&headers)?;

        let mut report = StageReport::new("normalize");

        for (index, row) in reader.records().enumerate() {
            // header is line 1
            let line = row
                .as_ref()
                .ok()
                .and_then(|r| r.position())
                .map(|p| p.line() as usize)
                .unwrap_or(index + 2);

            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    report.fail(RecordError::Format { line, reason: e.to_string() });
                    continue;
                }
            };

            match normalize_row(&row, &headers, id_index, line) {
                Ok(fields) => {
                    writer.write_record(&fields)?;
                    report.processed += 1;
                }
                Err(e) => report.fail(e),
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow!("Cannot flush normalized CSV: {e}"))?;
        let text = String::from_utf8(bytes).context("Normalized CSV is not UTF-8")?;

        if report.processed == 0 && report.failed() == 0 {
            bail!("CSV input has a header but no data rows");
        }
        Ok(NormalizedCsv { text, report })
    }
}

fn normalize_row(
    row:      &csv::StringRecord,
    headers:  &[String],
    id_index: usize,
    line:     usize,
) -> std::result::Result<Vec<String>, RecordError> {
    if row.len() != headers.len() {
        return Err(RecordError::Format {
            line,
            reason: format!("expected {} fields, found {}", headers.len(), row.len()),
        });
    }

    row.iter()
        .enumerate()
        .map(|(col, raw)| {
            let raw = raw.trim();
            if col == id_index {
                return Ok(raw.to_string());
            }
            let value = raw.replace(',', ".");
            match value.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(value),
                _ => Err(RecordError::Data {
                    line,
                    column: headers[col].clone(),
                    value:  raw.to_string(),
                }),
            }
        })
        .collect()
}

/// Pick `;` when the header has more semicolons than commas.
fn detect_delimiter(header: &str) -> u8 {
    let semicolons = header.matches(';').count();
    let commas     = header.matches(',').count();
    if semicolons > commas { b';' } else { b',' }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "Raport;C1;C2\nOrlen 2023;1;0,5\nPKN;0;2,75\n";

    #[test]
    fn test_semicolons_and_decimals_rewritten() {
        let out = FormatNormalizer::new("Raport").normalize(RAW).unwrap();
        assert_eq!(out.text, "Raport,C1,C2\nOrlen 2023,1,0.5\nPKN,0,2.75\n");
        assert_eq!(out.report.processed, 2);
        assert_eq!(out.report.failed(), 0);
    }

    #[test]
    fn test_normalizer_is_idempotent() {
        let n     = FormatNormalizer::new("Raport");
        let once  = n.normalize(RAW).unwrap().text;
        let twice = n.normalize(&once).unwrap().text;
        assert_eq!(once, twice);
    }

    #[test]
    fn test_id_with_comma_survives_round_trip() {
        let n     = FormatNormalizer::new("Raport");
        let once  = n.normalize("Raport;C1\nGrupa A, S.A.;1\n").unwrap().text;
        assert_eq!(once, "Raport,C1\n\"Grupa A, S.A.\",1\n");
        assert_eq!(n.normalize(&once).unwrap().text, once);
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        let input = "Raport;C1;C2\nA;1\nB;1;0\n";
        let out   = FormatNormalizer::new("Raport").normalize(input).unwrap();
        assert_eq!(out.text, "Raport,C1,C2\nB,1,0\n");
        assert!(matches!(out.report.failures[0], RecordError::Format { line: 2, .. }));
    }

    #[test]
    fn test_unparseable_number_is_data_error() {
        let input = "Raport;C1\nA;tak\nB;1\n";
        let out   = FormatNormalizer::new("Raport").normalize(input).unwrap();
        assert_eq!(out.report.processed, 1);
        match &out.report.failures[0] {
            RecordError::Data { column, value, .. } => {
                assert_eq!(column, "C1");
                assert_eq!(value, "tak");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_id_column_is_fatal() {
        assert!(FormatNormalizer::new("document_id").normalize(RAW).is_err());
    }

    #[test]
    fn test_empty_input_is_fatal() {
        assert!(FormatNormalizer::new("Raport").normalize("").is_err());
    }
}
