// ============================================================
// Layer 2 — DownloadUseCase
// ============================================================
// Makes sure `paths.tokenizer_path` holds a tokenizer before
// tokenization. See `infra::tokenizer_store` for the order in
// which sources are tried.

use std::{fmt, path::PathBuf};

use anyhow::{bail, Result};

use crate::data::{
    dataset::{DatasetDict, TRAIN_SPLIT},
    loader::read_jsonl,
};
use crate::domain::{document::LabeledRecord, outcome::StageReport};
use crate::infra::{
    config::PipelineConfig,
    tokenizer_store::{token_id, TokenizerOrigin, TokenizerStore},
};

#[derive(Debug)]
pub struct DownloadSummary {
    pub path:       PathBuf,
    pub origin:     TokenizerOrigin,
    pub vocab_size: usize,
    pub pad_id:     u32,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tokenizer at '{}' from {} ({} tokens, pad id {})",
            self.path.display(),
            self.origin,
            self.vocab_size,
            self.pad_id
        )
    }
}

pub struct DownloadUseCase<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DownloadUseCase<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<DownloadSummary> {
        let cfg   = self.config;
        let store = TokenizerStore::new(&cfg.paths.tokenizer_path);

        let (tokenizer, origin) = store.acquire(&cfg.model_name, cfg.encoder.vocab_size, || {
            training_texts(cfg)
        })?;

        let vocab_size = tokenizer.get_vocab_size(true);
        if vocab_size > cfg.encoder.vocab_size {
            bail!(
                "tokenizer has {} tokens but encoder.vocab_size is {}",
                vocab_size,
                cfg.encoder.vocab_size
            );
        }

        Ok(DownloadSummary {
            path: store.path().to_path_buf(),
            origin,
            vocab_size,
            pad_id: token_id(&tokenizer, &cfg.chunking.pad_token)?,
        })
    }
}

/// Texts of the training split, the corpus for a built vocabulary.
pub(crate) fn training_texts(cfg: &PipelineConfig) -> Result<Vec<String>> {
    let path = DatasetDict::split_path(&cfg.paths.dataset_dir, TRAIN_SPLIT);
    let mut report = StageReport::new("tokenizer corpus");
    let records: Vec<LabeledRecord> = read_jsonl(&path, &mut report)?;
    report.ensure_output(records.len())?;
    Ok(records.into_iter().map(|r| r.text).collect())
}
