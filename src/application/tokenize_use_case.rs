// ============================================================
// Layer 2 — TokenizeUseCase
// ============================================================
// Tokenizes both dataset splits and cuts every report into
// fixed-length overlapping windows:
//
//   Step 1: Check the split, acquire the tokenizer, pad id
//   Step 2: Per split, repair output left by an interrupted run
//   Step 3: Encode + chunk pending reports in parallel batches
//   Step 4: Write dataset_info.json
//
// Resume protocol, per split directory:
//
//   chunks.jsonl    chunk rows, appended batch by batch
//   completed.txt   ids whose chunks are all in chunks.jsonl,
//                   appended only after the batch's rows are
//                   flushed
//
// On restart, rows of documents not listed in completed.txt
// (a batch cut short, a half-written last line) are dropped
// and those documents are tokenized again. Ids no longer in
// the split (the dataset was split again) are dropped too.

use std::{
    collections::HashSet,
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use tokenizers::Tokenizer;

use crate::application::download_use_case::training_texts;
use crate::data::{
    chunker::Chunker,
    dataset::{chunks_path, completed_path, ChunkRecord, DatasetDict, DatasetInfo, SplitEntry, SPLITS},
    loader::{read_jsonl, write_jsonl},
};
use crate::domain::{
    document::LabeledRecord,
    outcome::{RecordError, StageReport},
};
use crate::infra::{
    config::PipelineConfig,
    tokenizer_store::{token_id, TokenizerStore},
};

#[derive(Debug)]
pub struct SplitSummary {
    pub split:     String,
    /// Documents tokenized by this run
    pub tokenized: usize,
    /// Documents already complete from an earlier run
    pub resumed:   usize,
    pub chunks:    usize,
    pub report:    StageReport,
}

#[derive(Debug)]
pub struct TokenizeSummary {
    pub splits: Vec<SplitSummary>,
}

impl fmt::Display for TokenizeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .splits
            .iter()
            .map(|s| {
                format!(
                    "{}: {} chunks ({} documents tokenized, {} resumed, {} failed)",
                    s.split,
                    s.chunks,
                    s.tokenized,
                    s.resumed,
                    s.report.failed()
                )
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

pub struct TokenizeUseCase<'a> {
    config: &'a PipelineConfig,
}

impl<'a> TokenizeUseCase<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TokenizeSummary> {
        let cfg = self.config;
        let out = &cfg.paths.tokenized_dir;

        // ── Step 1: Tokenizer ─────────────────────────────────────────────────
        let dict = DatasetDict::load(&cfg.paths.dataset_dir)?;
        if dict.criteria != cfg.criterion_ids() {
            bail!(
                "dataset was split for criteria {:?} but the configuration lists {:?}; re-run the dataset step",
                dict.criteria,
                cfg.criterion_ids()
            );
        }

        let store = TokenizerStore::new(&cfg.paths.tokenizer_path);
        let (tokenizer, origin) =
            store.acquire(&cfg.model_name, cfg.encoder.vocab_size, || training_texts(cfg))?;
        tracing::info!("Tokenizer from {}", origin);

        let c       = &cfg.chunking;
        let pad     = token_id(&tokenizer, &c.pad_token)?;
        let mut chunker = Chunker::new(c.max_length, c.overlap, c.tail, pad)?;
        if c.add_special_tokens {
            let bos = token_id(&tokenizer, &c.bos_token)?;
            let eos = token_id(&tokenizer, &c.eos_token)?;
            chunker = chunker.with_special_tokens(bos, eos)?;
        }
        tracing::info!(
            "Windows of {} tokens ({} content), stride {}, pad id {}",
            c.max_length,
            c.content_length(),
            c.stride(),
            pad
        );

        // ── Steps 2–3: Each split ─────────────────────────────────────────────
        let mut splits = Vec::with_capacity(SPLITS.len());
        for split in SPLITS {
            splits.push(self.tokenize_split(split, &tokenizer, &chunker)?);
        }

        // ── Step 4: dataset_info.json ─────────────────────────────────────────
        DatasetInfo {
            tokenizer:      cfg.model_name.clone(),
            max_length:     c.max_length,
            overlap:        c.overlap,
            tail:           c.tail,
            pad_id:         pad,
            special_tokens: c.add_special_tokens,
            criteria:       cfg.criterion_ids(),
            splits:         splits
                .iter()
                .map(|s| SplitEntry { name: s.split.clone(), num_rows: s.chunks })
                .collect(),
        }
        .save(out)?;

        Ok(TokenizeSummary { splits })
    }

    fn tokenize_split(&self, split: &str, tokenizer: &Tokenizer, chunker: &Chunker) -> Result<SplitSummary> {
        let cfg      = self.config;
        let out      = &cfg.paths.tokenized_dir;
        let criteria = cfg.criterion_ids();
        let mut report = StageReport::new(format!("tokenize/{split}"));

        let records: Vec<LabeledRecord> =
            read_jsonl(&DatasetDict::split_path(&cfg.paths.dataset_dir, split), &mut report)?;
        // processed counts tokenized documents, not rows read
        report.processed = 0;

        // ── Repair ────────────────────────────────────────────────────────────
        let chunks_file    = chunks_path(out, split);
        let completed_file = completed_path(out, split);
        let split_ids: HashSet<&str> = records.iter().map(|r| r.document_id.as_str()).collect();
        let completed      = read_completed(&completed_file, &split_ids)?;
        let mut chunks     = repair_chunks(&chunks_file, &completed)?;

        let pending: Vec<&LabeledRecord> = records
            .iter()
            .filter(|r| !completed.contains(&r.document_id))
            .collect();
        let resumed = records.len() - pending.len();
        if resumed > 0 {
            tracing::info!("[{}] resuming: {} documents already tokenized", split, resumed);
        }

        // ── Encode + chunk ────────────────────────────────────────────────────
        let batch_size = cfg.chunking.documents_per_batch.max(1);
        let mut tokenized = 0usize;

        for batch in pending.chunks(batch_size) {
            // par_iter().map().collect() keeps input order
            let results: Vec<std::result::Result<Vec<ChunkRecord>, RecordError>> = batch
                .par_iter()
                .map(|rec| encode_and_chunk(tokenizer, chunker, rec, &criteria))
                .collect();

            let mut rows = Vec::new();
            let mut done = Vec::new();
            for (rec, result) in batch.iter().zip(results) {
                match result {
                    Ok(doc_chunks) => {
                        tracing::debug!("'{}' → {} chunks", rec.document_id, doc_chunks.len());
                        rows.extend(doc_chunks);
                        done.push(rec.document_id.as_str());
                        report.processed += 1;
                    }
                    Err(e) => report.fail(e),
                }
            }

            append_jsonl(&chunks_file, &rows)?;
            append_lines(&completed_file, &done)?;
            chunks    += rows.len();
            tokenized += done.len();
            tracing::info!(
                "[{}] {}/{} documents done",
                split,
                resumed + tokenized,
                records.len()
            );
        }

        report.ensure_output(chunks)?;
        report.log();

        Ok(SplitSummary { split: split.to_string(), tokenized, resumed, chunks, report })
    }
}

/// Encode one report and cut it into windows carrying its labels.
fn encode_and_chunk(
    tokenizer: &Tokenizer,
    chunker:   &Chunker,
    record:    &LabeledRecord,
    criteria:  &[String],
) -> std::result::Result<Vec<ChunkRecord>, RecordError> {
    let labels = record.label_vector(criteria).ok_or_else(|| RecordError::MissingCriterion {
        document_id: record.document_id.clone(),
        criterion:   criteria
            .iter()
            .find(|c| !record.labels.contains_key(*c))
            .cloned()
            .unwrap_or_default(),
    })?;

    // specials go around each window, not around the whole report
    let encoding = tokenizer
        .encode(record.text.as_str(), false)
        .map_err(|e| RecordError::Tokenization {
            document_id: record.document_id.clone(),
            reason:      e.to_string(),
        })?;

    chunker.chunk(&record.document_id, encoding.get_ids(), &labels)
}

/// Ids listed in `completed.txt` that still belong to this split.
/// Ids of documents the split no longer holds are dropped from the file.
fn read_completed(path: &Path, split_ids: &HashSet<&str>) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let file = File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))?;
    let mut ids   = HashSet::new();
    let mut stale = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id   = line.trim();
        if id.is_empty() {
            continue;
        }
        if split_ids.contains(id) {
            ids.insert(id.to_string());
        } else {
            stale += 1;
        }
    }

    if stale > 0 {
        tracing::warn!(
            "{} completed ids in '{}' are not in the current split; they will be dropped",
            stale,
            path.display()
        );
        let mut kept: Vec<&str> = ids.iter().map(String::as_str).collect();
        kept.sort_unstable();
        fs::remove_file(path).with_context(|| format!("Cannot rewrite '{}'", path.display()))?;
        append_lines(path, &kept)?;
    }
    Ok(ids)
}

/// Keep only rows of completed documents of this split; returns the
/// row count kept.
fn repair_chunks(path: &Path, completed: &HashSet<String>) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    // unparseable lines are the tail of an interrupted write
    let mut scratch = StageReport::new("repair");
    let rows: Vec<ChunkRecord> = read_jsonl(path, &mut scratch)?;
    let total = rows.len() + scratch.failed();
    let kept: Vec<ChunkRecord> = rows
        .into_iter()
        .filter(|c| completed.contains(&c.document_id))
        .collect();

    if kept.len() != total {
        tracing::warn!(
            "Dropping {} chunk rows of unfinished documents from '{}'",
            total - kept.len(),
            path.display()
        );
        write_jsonl(path, &kept)?;
    }
    Ok(kept.len())
}

fn append_jsonl(path: &Path, rows: &[ChunkRecord]) -> Result<()> {
    let mut out = BufWriter::new(open_append(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush().with_context(|| format!("Cannot write '{}'", path.display()))
}

fn append_lines(path: &Path, lines: &[&str]) -> Result<()> {
    let mut out = BufWriter::new(open_append(path)?);
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush().with_context(|| format!("Cannot write '{}'", path.display()))
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dataset_use_case::DatasetUseCase;
    use crate::application::test_support::{prepare_dataset, test_config};
    use crate::data::chunker::aggregate_labels;
    use crate::data::dataset::{TRAIN_SPLIT, VALIDATION_SPLIT};

    fn read_chunks(cfg: &PipelineConfig, split: &str) -> Vec<ChunkRecord> {
        let mut r = StageReport::new("test");
        read_jsonl(&chunks_path(&cfg.paths.tokenized_dir, split), &mut r).unwrap()
    }

    #[test]
    fn test_tokenize_writes_chunks_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let records = prepare_dataset(&cfg);

        let summary = TokenizeUseCase::new(&cfg).execute().unwrap();
        assert_eq!(summary.splits.len(), 2);

        let train = read_chunks(&cfg, TRAIN_SPLIT);
        assert!(!train.is_empty());
        assert!(train.iter().all(|c| c.input_ids.len() == cfg.chunking.max_length));

        // every chunk carries its report's labels
        let recovered = aggregate_labels(&train);
        for (doc, labels) in &recovered {
            let rec = records.iter().find(|r| &r.document_id == doc).unwrap();
            assert_eq!(Some(labels.clone()), rec.label_vector(&cfg.criterion_ids()));
        }

        let info = DatasetInfo::load(&cfg.paths.tokenized_dir).unwrap();
        assert_eq!(info.pad_id, 1);
        assert_eq!(info.splits[0].num_rows, train.len());
        assert_eq!(info.splits[1].num_rows, read_chunks(&cfg, VALIDATION_SPLIT).len());
    }

    #[test]
    fn test_resume_repairs_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        prepare_dataset(&cfg);

        TokenizeUseCase::new(&cfg).execute().unwrap();
        let expected = read_chunks(&cfg, TRAIN_SPLIT);

        // Simulate a crash: last document not marked complete, torn last line
        let completed_file = completed_path(&cfg.paths.tokenized_dir, TRAIN_SPLIT);
        let ids = fs::read_to_string(&completed_file).unwrap();
        let mut lines: Vec<&str> = ids.lines().collect();
        let dropped = lines.pop().unwrap().to_string();
        fs::write(&completed_file, lines.join("\n") + "\n").unwrap();
        let chunks_file = chunks_path(&cfg.paths.tokenized_dir, TRAIN_SPLIT);
        let mut f = OpenOptions::new().append(true).open(&chunks_file).unwrap();
        write!(f, "{{\"chunk_id\": \"torn").unwrap();

        let summary = TokenizeUseCase::new(&cfg).execute().unwrap();
        let train_summary = &summary.splits[0];
        assert_eq!(train_summary.tokenized, 1);
        assert_eq!(train_summary.resumed, lines.len());

        let mut after = read_chunks(&cfg, TRAIN_SPLIT);
        let mut before = expected.clone();
        after.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        before.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        assert_eq!(after, before);
        assert!(after.iter().any(|c| c.document_id == dropped));
    }

    #[test]
    fn test_resume_after_resplit_keeps_splits_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        let records = prepare_dataset(&cfg);
        TokenizeUseCase::new(&cfg).execute().unwrap();

        // Interrupted before dataset_info.json, then split again with another seed
        fs::remove_file(DatasetInfo::path(&cfg.paths.tokenized_dir)).unwrap();
        cfg.split.seed = 7;
        DatasetUseCase::new(&cfg).execute().unwrap();
        TokenizeUseCase::new(&cfg).execute().unwrap();

        let docs = |split: &str| -> HashSet<String> {
            read_chunks(&cfg, split).into_iter().map(|c| c.document_id).collect()
        };
        let train      = docs(TRAIN_SPLIT);
        let validation = docs(VALIDATION_SPLIT);
        assert!(train.is_disjoint(&validation), "shared: {:?}", train.intersection(&validation).collect::<Vec<_>>());
        assert_eq!(train.len() + validation.len(), records.len());

        // completed.txt lists exactly the split's documents
        let completed = fs::read_to_string(completed_path(&cfg.paths.tokenized_dir, TRAIN_SPLIT)).unwrap();
        let listed: HashSet<String> = completed.lines().map(str::to_string).collect();
        assert_eq!(listed, train);
    }

    #[test]
    fn test_long_report_is_windowed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        prepare_dataset(&cfg);

        TokenizeUseCase::new(&cfg).execute().unwrap();
        let chunks: Vec<ChunkRecord> = SPLITS
            .iter()
            .flat_map(|s| read_chunks(&cfg, s))
            .filter(|c| c.document_id == "long")
            .collect();

        // 40 words, 14 content tokens beside <s> </s>, overlap 4 → stride 10,
        // right-aligned tail at 26
        let starts: Vec<usize> = chunks.iter().map(|c| c.token_offset).collect();
        assert_eq!(starts, vec![0, 10, 20, 26]);
        assert!(chunks.iter().all(|c| c.real_tokens() == 16));
        assert!(chunks.iter().all(|c| c.input_ids[0] == 0 && c.input_ids[15] == 2));
    }
}
