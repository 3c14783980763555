// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates fine-tuning in order:
//
//   Step 1: Check the tokenized dataset matches the config  (Layer 4 - data)
//   Step 2: Load train / validation chunks                  (Layer 4 - data)
//   Step 3: Compute positive-class weights                  (Layer 5 - ml)
//   Step 4: Build the job and run the training loop         (Layer 5 - ml)
//   Step 5: Write the final artifact from best/             (Layer 6 - infra)
//
// The loop is injected as `Box<dyn TrainingLoop>`, so this
// workflow does not depend on a Burn backend.

use std::{fmt, path::PathBuf};

use anyhow::{bail, Result};

use crate::data::{
    dataset::{chunks_path, ChunkDataset, ChunkRecord, DatasetInfo, TRAIN_SPLIT, VALIDATION_SPLIT},
    loader::read_jsonl,
};
use crate::domain::outcome::StageReport;
use crate::infra::{
    checkpoint::{CheckpointManager, FinalArtifact},
    config::PipelineConfig,
};
use crate::ml::{
    model::EsgClassifierConfig,
    trainer::{TrainJob, TrainOutcome, TrainingLoop},
    weights::{class_weights, ClassWeight},
};

#[derive(Debug)]
pub struct TrainSummary {
    pub outcome:       TrainOutcome,
    pub final_dir:     PathBuf,
    pub class_weights: Vec<ClassWeight>,
    pub metric_name:   String,
}

impl fmt::Display for TrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "best {}={:.4} at epoch {} ({} epochs run, {} steps); final model in '{}'",
            self.metric_name,
            self.outcome.best_metric,
            self.outcome.best_epoch,
            self.outcome.epochs_run,
            self.outcome.global_step,
            self.final_dir.display()
        )
    }
}

pub struct TrainUseCase<'a> {
    config:        &'a PipelineConfig,
    training_loop: Box<dyn TrainingLoop>,
}

impl<'a> TrainUseCase<'a> {
    pub fn new(config: &'a PipelineConfig, training_loop: Box<dyn TrainingLoop>) -> Self {
        Self { config, training_loop }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg      = self.config;
        let criteria = cfg.criterion_ids();
        let tok_dir  = &cfg.paths.tokenized_dir;

        // ── Step 1: Dataset / config agreement ────────────────────────────────
        let info = DatasetInfo::load(tok_dir)?;
        if info.criteria != criteria {
            bail!(
                "tokenized dataset has criteria {:?} but the configuration lists {:?}; re-run tokenization",
                info.criteria,
                criteria
            );
        }
        if info.max_length != cfg.chunking.max_length {
            bail!(
                "tokenized dataset uses windows of {} tokens but chunking.max_length is {}; re-run tokenization",
                info.max_length,
                cfg.chunking.max_length
            );
        }
        if !cfg.paths.tokenizer_path.is_file() {
            bail!(
                "no tokenizer at '{}'; run the download or tokenize step first",
                cfg.paths.tokenizer_path.display()
            );
        }

        // ── Step 2: Load chunks ───────────────────────────────────────────────
        let train      = load_split(tok_dir, TRAIN_SPLIT)?;
        let validation = load_split(tok_dir, VALIDATION_SPLIT)?;
        tracing::info!("Loaded {} training and {} validation chunks", train.len(), validation.len());

        // ── Step 3: Class weights ─────────────────────────────────────────────
        let train      = ChunkDataset::new(train);
        let validation = ChunkDataset::new(validation);
        let weights    = class_weights(&train.label_rows(), cfg.num_labels, cfg.class_weight_method);
        for (id, w) in criteria.iter().zip(&weights) {
            tracing::info!(
                "Class weight {}: {:.3} ({}/{} positive)",
                id, w.weight, w.positives, w.total
            );
        }

        // ── Step 4: Train ─────────────────────────────────────────────────────
        let e = &cfg.encoder;
        let job = TrainJob {
            train,
            validation,
            model: EsgClassifierConfig::new(
                e.vocab_size,
                cfg.chunking.max_length,
                e.d_model,
                e.num_heads,
                e.num_layers,
                e.d_ff,
                cfg.num_labels,
                e.dropout,
            ),
            pos_weight:        weights.iter().map(|w| w.weight).collect(),
            criteria:          criteria.clone(),
            args:              cfg.training_args.clone(),
            output_dir:        cfg.paths.model_output_path.clone(),
            pretrained_record: e.pretrained_record.clone(),
        };
        let outcome = self.training_loop.run(job)?;

        // ── Step 5: Final artifact ────────────────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.paths.model_output_path)?;
        let training_config = serde_json::to_value(cfg)?;
        let final_dir = ckpt.finalize(FinalArtifact {
            tokenizer_path:  &cfg.paths.tokenizer_path,
            training_config: &training_config,
            report:          &outcome.best_report,
        })?;

        Ok(TrainSummary {
            outcome,
            final_dir,
            class_weights: weights,
            metric_name:   cfg.training_args.metric_for_best_model.clone(),
        })
    }
}

fn load_split(tokenized_dir: &std::path::Path, split: &str) -> Result<Vec<ChunkRecord>> {
    let mut report = StageReport::new(format!("load/{split}"));
    let chunks: Vec<ChunkRecord> = read_jsonl(&chunks_path(tokenized_dir, split), &mut report)?;
    report.ensure_output(chunks.len())?;
    Ok(chunks)
}
