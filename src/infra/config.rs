// ============================================================
// Layer 6 — Pipeline Configuration
// ============================================================
// One JSON file describes the whole run: model identity, every
// stage's input/output path, criterion bins, chunking, split
// and training hyperparameters.
//
// The file is read exactly once, in `main`, into a
// `PipelineConfig` that is then passed by reference to every
// stage. Relative paths are resolved against the directory of
// the config file at load time, so no stage resolves paths on
// its own.
//
// Every section has serde defaults mirroring the reference
// config.json, so a minimal file only needs the paths that
// differ.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

// ─── Root ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hub identifier of the pretrained model / tokenizer
    pub model_name:          String,
    pub num_labels:          usize,
    pub problem_type:        String,
    pub paths:               PathsConfig,
    pub sources:             SourceConfig,
    /// Criteria in label-vector order
    pub criteria:            Vec<CriterionConfig>,
    pub split:               SplitConfig,
    pub chunking:            ChunkingConfig,
    pub class_weight_method: ClassWeightMethod,
    pub encoder:             EncoderConfig,
    pub training_args:       TrainingArgs,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let criteria: Vec<CriterionConfig> = ["C1", "C2", "C3", "C5", "C8", "C9", "C10"]
            .iter()
            .map(|id| CriterionConfig::binary(id))
            .collect();
        Self {
            model_name:          "sdadas/polish-longformer-base-4096".to_string(),
            num_labels:          criteria.len(),
            problem_type:        "multi_label_classification".to_string(),
            paths:               PathsConfig::default(),
            sources:             SourceConfig::default(),
            criteria,
            split:               SplitConfig::default(),
            chunking:            ChunkingConfig::default(),
            class_weight_method: ClassWeightMethod::Balanced,
            encoder:             EncoderConfig::default(),
            training_args:       TrainingArgs::default(),
        }
    }
}

impl PipelineConfig {
    /// Read, resolve and validate the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration file '{}'", path.display()))?;

        let mut config: PipelineConfig = serde_json::from_str(&json)
            .with_context(|| format!("Cannot parse configuration file '{}'", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.paths.resolve_against(base);
        config.encoder.pretrained_record = config
            .encoder
            .pretrained_record
            .take()
            .map(|p| resolve(base, p));

        config.validate()?;
        tracing::debug!("Loaded configuration from '{}'", path.display());
        Ok(config)
    }

    /// Criterion ids in label-vector order.
    pub fn criterion_ids(&self) -> Vec<String> {
        self.criteria.iter().map(|c| c.id.clone()).collect()
    }

    /// Structural checks that would otherwise surface mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.criteria.is_empty() {
            bail!("configuration lists no criteria");
        }
        if self.num_labels != self.criteria.len() {
            bail!(
                "num_labels is {} but {} criteria are configured",
                self.num_labels,
                self.criteria.len()
            );
        }

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if !seen.insert(criterion.id.as_str()) {
                bail!("criterion '{}' is configured twice", criterion.id);
            }
            criterion.validate()?;
        }

        let c = &self.chunking;
        if c.max_length == 0 {
            bail!("chunking.max_length must be positive");
        }
        if c.overlap >= c.content_length() {
            bail!(
                "chunking.overlap ({}) must be less than the {} content tokens of a window",
                c.overlap,
                c.content_length()
            );
        }

        let f = self.split.validation_fraction;
        if !(f > 0.0 && f < 1.0) {
            bail!("split.validation_fraction must lie in (0, 1), got {f}");
        }

        let t = &self.training_args;
        if t.per_device_train_batch_size == 0 || t.per_device_eval_batch_size == 0 {
            bail!("batch sizes must be positive");
        }
        if t.gradient_accumulation_steps == 0 {
            bail!("gradient_accumulation_steps must be positive");
        }
        if t.num_train_epochs == 0 {
            bail!("num_train_epochs must be positive");
        }
        if t.eval_strategy == IntervalStrategy::No {
            bail!("eval_strategy 'no' leaves nothing to select the best checkpoint by");
        }

        let e = &self.encoder;
        ensure!(e.num_heads > 0, "encoder.num_heads must be positive");
        if e.d_model % e.num_heads != 0 {
            bail!("encoder.d_model ({}) must be divisible by encoder.num_heads ({})", e.d_model, e.num_heads);
        }
        Ok(())
    }
}

// ─── Paths ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Expert score sheet, `;`-delimited with comma decimals
    pub raw_csv_path:       PathBuf,
    /// Directory with one `<document_id>.txt` per report
    pub raw_text_dir:       Option<PathBuf>,
    /// Raw JSONL export (used when `raw_text_dir` is not set)
    pub raw_jsonl_path:     Option<PathBuf>,
    pub converted_csv_path: PathBuf,
    pub cleaned_jsonl_path: PathBuf,
    pub final_jsonl:        PathBuf,
    pub dataset_dir:        PathBuf,
    pub tokenizer_path:     PathBuf,
    pub tokenized_dir:      PathBuf,
    pub model_output_path:  PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_csv_path:       "data/raw/oceny.csv".into(),
            raw_text_dir:       None,
            raw_jsonl_path:     Some("data/raw/raporty.jsonl".into()),
            converted_csv_path: "data/processed/oceny_converted.csv".into(),
            cleaned_jsonl_path: "data/processed/raporty_cleaned.jsonl".into(),
            final_jsonl:        "data/processed/final.jsonl".into(),
            dataset_dir:        "data/processed/dataset".into(),
            tokenizer_path:     "data/tokenizer/tokenizer.json".into(),
            tokenized_dir:      "data/processed/tokenized".into(),
            model_output_path:  "models/esg-longformer".into(),
        }
    }
}

impl PathsConfig {
    fn resolve_against(&mut self, base: &Path) {
        for p in [
            &mut self.raw_csv_path,
            &mut self.converted_csv_path,
            &mut self.cleaned_jsonl_path,
            &mut self.final_jsonl,
            &mut self.dataset_dir,
            &mut self.tokenizer_path,
            &mut self.tokenized_dir,
            &mut self.model_output_path,
        ] {
            *p = resolve(base, std::mem::take(p));
        }
        self.raw_text_dir   = self.raw_text_dir.take().map(|p| resolve(base, p));
        self.raw_jsonl_path = self.raw_jsonl_path.take().map(|p| resolve(base, p));
    }
}

fn resolve(base: &Path, p: PathBuf) -> PathBuf {
    if p.is_absolute() { p } else { base.join(p) }
}

// ─── Sources ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Score-sheet column holding the report identifier
    pub document_id_column: String,
    /// Raw JSONL field holding the report identifier
    pub jsonl_id_field:     String,
    /// Raw JSONL field holding the report text
    pub jsonl_text_field:   String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            document_id_column: "document_id".to_string(),
            jsonl_id_field:     "nazwa_raportu".to_string(),
            jsonl_text_field:   "text".to_string(),
        }
    }
}

// ─── Criteria ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionConfig {
    pub id:   String,
    pub bins: Vec<BinConfig>,
}

/// `[min, max)` → `label`, or `[min, max]` when `max_inclusive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinConfig {
    pub label: u8,
    pub min:   f64,
    pub max:   f64,
    #[serde(default)]
    pub max_inclusive: bool,
}

impl BinConfig {
    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && (x < self.max || (self.max_inclusive && x == self.max))
    }
}

impl CriterionConfig {
    /// Two-bin criterion: `[0, 0.5)` → 0, `[0.5, 1]` → 1.
    pub fn binary(id: &str) -> Self {
        Self {
            id:   id.to_string(),
            bins: vec![
                BinConfig { label: 0, min: 0.0, max: 0.5, max_inclusive: false },
                BinConfig { label: 1, min: 0.5, max: 1.0, max_inclusive: true },
            ],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bins.is_empty() {
            bail!("criterion '{}' has no bins", self.id);
        }
        for bin in &self.bins {
            if !(bin.min < bin.max || (bin.min == bin.max && bin.max_inclusive)) {
                bail!("criterion '{}': empty bin [{}, {}]", self.id, bin.min, bin.max);
            }
        }
        let mut sorted: Vec<&BinConfig> = self.bins.iter().collect();
        sorted.sort_by(|a, b| a.min.total_cmp(&b.min));
        for pair in sorted.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let overlaps = b.min < a.max || (b.min == a.max && a.max_inclusive);
            if overlaps {
                bail!("criterion '{}': bins [{}, {}] and [{}, {}] overlap", self.id, a.min, a.max, b.min, b.max);
            }
        }
        let mut labels = HashSet::new();
        for bin in &self.bins {
            if !labels.insert(bin.label) {
                bail!("criterion '{}': label {} is assigned to two bins", self.id, bin.label);
            }
        }
        Ok(())
    }
}

// ─── Split ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub validation_fraction: f64,
    pub seed:                u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { validation_fraction: 0.2, seed: 42 }
    }
}

// ─── Chunking ─────────────────────────────────────────────────────────────────
/// How the last window of a long document is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Last window is `[T - L, T)`, never padded
    RightAligned,
    /// Last strided window is cut at `T` and padded to `L`
    Padded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_length: usize,
    pub overlap:    usize,
    pub tail:       TailPolicy,
    /// Token looked up in the tokenizer vocabulary for padding
    pub pad_token:  String,
    /// Wrap every window in `bos_token … eos_token`
    pub add_special_tokens: bool,
    pub bos_token:  String,
    pub eos_token:  String,
    /// Documents tokenized per parallel batch between progress saves
    pub documents_per_batch: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_length:          4096,
            overlap:             512,
            tail:                TailPolicy::RightAligned,
            pad_token:           "<pad>".to_string(),
            add_special_tokens:  true,
            bos_token:           "<s>".to_string(),
            eos_token:           "</s>".to_string(),
            documents_per_batch: 16,
        }
    }
}

impl ChunkingConfig {
    /// Document tokens per window.
    pub fn content_length(&self) -> usize {
        if self.add_special_tokens {
            self.max_length.saturating_sub(2)
        } else {
            self.max_length
        }
    }

    /// Advance between consecutive windows.
    pub fn stride(&self) -> usize {
        self.content_length().saturating_sub(self.overlap)
    }
}

// ─── Class weights ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeightMethod {
    Balanced,
    Sqrt,
    Log,
    None,
}

// ─── Encoder ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Wgpu,
    Cpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    pub dropout:    f64,
    /// Burn record with pretrained encoder weights to start from
    pub pretrained_record: Option<PathBuf>,
    pub device:     ComputeDevice,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            vocab_size:        50_265,
            d_model:           256,
            num_heads:         8,
            num_layers:        6,
            d_ff:              1024,
            dropout:           0.1,
            pretrained_record: None,
            device:            ComputeDevice::Wgpu,
        }
    }
}

// ─── Training arguments ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    Linear,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStrategy {
    Epoch,
    No,
}

/// How chunk probabilities are combined into one report row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArgs {
    pub learning_rate:               f64,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size:  usize,
    pub gradient_accumulation_steps: usize,
    pub num_train_epochs:            usize,
    pub lr_scheduler_type:           SchedulerType,
    pub warmup_steps:                usize,
    pub weight_decay:                f64,
    pub max_grad_norm:               Option<f32>,
    pub fp16:                        bool,
    pub eval_strategy:               IntervalStrategy,
    pub save_strategy:               IntervalStrategy,
    pub save_total_limit:            usize,
    pub seed:                        u64,
    pub metric_for_best_model:       String,
    pub greater_is_better:           bool,
    pub resume_from_checkpoint:      bool,
    /// How chunk probabilities combine for the `doc_*` metrics
    pub document_aggregation:        Aggregation,
}

impl Default for TrainingArgs {
    fn default() -> Self {
        Self {
            learning_rate:               2e-5,
            per_device_train_batch_size: 1,
            per_device_eval_batch_size:  1,
            gradient_accumulation_steps: 8,
            num_train_epochs:            5,
            lr_scheduler_type:           SchedulerType::Linear,
            warmup_steps:                100,
            weight_decay:                0.01,
            max_grad_norm:               Some(1.0),
            fp16:                        false,
            eval_strategy:               IntervalStrategy::Epoch,
            save_strategy:               IntervalStrategy::Epoch,
            save_total_limit:            1,
            seed:                        42,
            metric_for_best_model:       "f1_macro".to_string(),
            greater_is_better:           true,
            resume_from_checkpoint:      true,
            document_aggregation:        Aggregation::Mean,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.num_labels, 7);
        // <s> and </s> take two of the 4096 positions
        assert_eq!(cfg.chunking.stride(), 3582);
    }

    #[test]
    fn test_stride_without_special_tokens() {
        let mut c = ChunkingConfig::default();
        c.add_special_tokens = false;
        assert_eq!(c.content_length(), 4096);
        assert_eq!(c.stride(), 3584);
    }

    #[test]
    fn test_zero_heads_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.encoder.num_heads = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("num_heads"));
    }

    #[test]
    fn test_label_count_mismatch_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.num_labels = 12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overlapping_bins_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.criteria[0].bins = vec![
            BinConfig { label: 0, min: 0.0, max: 2.0, max_inclusive: false },
            BinConfig { label: 1, min: 1.0, max: 3.0, max_inclusive: false },
        ];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overlap_must_be_below_window() {
        let mut cfg = PipelineConfig::default();
        cfg.chunking.overlap = 4096;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "paths": { "raw_csv_path": "in/scores.csv", "raw_text_dir": "/abs/texts" },
                 "chunking": { "tail": "padded" } }"#,
        )
        .unwrap();

        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.paths.raw_csv_path, dir.path().join("in/scores.csv"));
        assert_eq!(cfg.paths.raw_text_dir, Some(PathBuf::from("/abs/texts")));
        assert_eq!(cfg.paths.final_jsonl, dir.path().join("data/processed/final.jsonl"));
        assert_eq!(cfg.chunking.tail, TailPolicy::Padded);
        assert_eq!(cfg.chunking.max_length, 4096);
    }

    #[test]
    fn test_bin_contains_bounds() {
        let bin = BinConfig { label: 2, min: 3.0, max: 5.0, max_inclusive: true };
        assert!(bin.contains(3.0));
        assert!(bin.contains(5.0));
        assert!(!bin.contains(5.01));
        assert!(!bin.contains(2.99));
    }
}
