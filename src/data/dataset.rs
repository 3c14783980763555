// ============================================================
// Layer 4 — Dataset Layouts
// ============================================================
// The record types and on-disk layouts between stages:
//
//   dataset_dir/
//     train.jsonl            LabeledRecord per line
//     validation.jsonl
//     dataset_dict.json      split names, row counts, seed
//
//   tokenized_dir/
//     train/chunks.jsonl     ChunkRecord per line
//     train/completed.txt    document ids fully written
//     validation/...
//     dataset_info.json      window, overlap, tail, criteria
//
// `ChunkDataset` wraps the tokenized rows in Burn's Dataset
// trait so the DataLoader can index into them.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::infra::config::TailPolicy;

pub const TRAIN_SPLIT:      &str = "train";
pub const VALIDATION_SPLIT: &str = "validation";
pub const SPLITS: [&str; 2] = [TRAIN_SPLIT, VALIDATION_SPLIT];

/// One fixed-length window of a tokenised report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// `"{document_id}#{index:04}"`
    pub chunk_id:       String,
    pub document_id:    String,
    /// Position of the window's first token in the document
    pub token_offset:   usize,
    pub input_ids:      Vec<u32>,
    /// 1 = real token, 0 = padding
    pub attention_mask: Vec<u8>,
    /// Parent document's labels in criteria order
    pub labels:         Vec<u8>,
}

impl ChunkRecord {
    /// Number of real (unpadded) tokens.
    #[cfg(test)]
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

// ─── Split manifest ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub name:     String,
    pub num_rows: usize,
}

/// `dataset_dict.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDict {
    pub splits:              Vec<SplitEntry>,
    pub seed:                u64,
    pub validation_fraction: f64,
    pub criteria:            Vec<String>,
}

impl DatasetDict {
    pub fn path(dataset_dir: &Path) -> PathBuf {
        dataset_dir.join("dataset_dict.json")
    }

    pub fn split_path(dataset_dir: &Path, split: &str) -> PathBuf {
        dataset_dir.join(format!("{split}.jsonl"))
    }

    pub fn save(&self, dataset_dir: &Path) -> Result<()> {
        write_json(&Self::path(dataset_dir), self)
    }

    pub fn load(dataset_dir: &Path) -> Result<Self> {
        read_json(&Self::path(dataset_dir))
    }
}

// ─── Tokenized layout ─────────────────────────────────────────────────────────
/// `dataset_info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub tokenizer:   String,
    pub max_length:  usize,
    pub overlap:     usize,
    pub tail:        TailPolicy,
    pub pad_id:      u32,
    /// Windows are wrapped in `<s> … </s>`
    #[serde(default)]
    pub special_tokens: bool,
    pub criteria:    Vec<String>,
    pub splits:      Vec<SplitEntry>,
}

impl DatasetInfo {
    pub fn path(tokenized_dir: &Path) -> PathBuf {
        tokenized_dir.join("dataset_info.json")
    }

    pub fn save(&self, tokenized_dir: &Path) -> Result<()> {
        write_json(&Self::path(tokenized_dir), self)
    }

    pub fn load(tokenized_dir: &Path) -> Result<Self> {
        read_json(&Self::path(tokenized_dir))
    }
}

pub fn chunks_path(tokenized_dir: &Path, split: &str) -> PathBuf {
    tokenized_dir.join(split).join("chunks.jsonl")
}

pub fn completed_path(tokenized_dir: &Path, split: &str) -> PathBuf {
    tokenized_dir.join(split).join("completed.txt")
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Cannot parse '{}'", path.display()))
}

// ─── Burn Dataset ─────────────────────────────────────────────────────────────
pub struct ChunkDataset {
    chunks: Vec<ChunkRecord>,
}

impl ChunkDataset {
    pub fn new(chunks: Vec<ChunkRecord>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    /// Label rows of every chunk, in dataset order.
    pub fn label_rows(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().map(|c| c.labels.clone()).collect()
    }
}

impl Dataset<ChunkRecord> for ChunkDataset {
    fn get(&self, index: usize) -> Option<ChunkRecord> {
        self.chunks.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}
