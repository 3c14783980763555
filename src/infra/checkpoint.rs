// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores training state using Burn's CompactRecorder.
//
// Directory layout under `model_output_path`:
//
//   checkpoint-3/
//     model.mpk.gz          model parameters
//     optimizer.mpk.gz      AdamW moments, for resume
//     metrics.json          evaluation report of this epoch
//     trainer_state.json    written last; marks the checkpoint complete
//   best/                   copy of the best evaluated checkpoint
//   final/                  written once training has finished
//     model.mpk.gz
//     tokenizer.json
//     training_config.json
//     metrics.json          best metrics + tuned thresholds
//   metrics.csv             one row per epoch (MetricsLogger)
//
// A checkpoint directory without trainer_state.json was cut
// short and is never resumed from or promoted.
//
// Burn's CompactRecorder:
//   - Serialises records to MessagePack, gzip compressed
//   - Type-safe: loading fails if the architecture doesn't match

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use burn::{
    module::{AutodiffModule, Module},
    optim::Optimizer,
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::infra::metrics::EpochMetrics;
use crate::ml::evaluation::EvaluationReport;

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const MODEL_FILE:        &str = "model";
const OPTIMIZER_FILE:    &str = "optimizer";
const STATE_FILE:        &str = "trainer_state.json";
const METRICS_FILE:      &str = "metrics.json";

// ─── Trainer state ────────────────────────────────────────────────────────────
/// Progress of a training run, enough to resume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub epochs_completed: usize,
    pub global_step:      usize,
    pub metric_name:      String,
    pub best_metric:      Option<f64>,
    pub best_epoch:       Option<usize>,
    pub best_report:      Option<EvaluationReport>,
    pub log_history:      Vec<EpochMetrics>,
}

impl TrainerState {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            epochs_completed: 0,
            global_step:      0,
            metric_name:      metric_name.into(),
            best_metric:      None,
            best_epoch:       None,
            best_report:      None,
            log_history:      Vec::new(),
        }
    }

    pub fn load(checkpoint: &Path) -> Result<Self> {
        let path = checkpoint.join(STATE_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Cannot parse '{}'", path.display()))
    }
}

/// What `finalize` writes next to the best model record.
pub struct FinalArtifact<'a> {
    pub tokenizer_path:  &'a Path,
    pub training_config: &'a serde_json::Value,
    pub report:          &'a EvaluationReport,
}

// ─── CheckpointManager ────────────────────────────────────────────────────────
pub struct CheckpointManager {
    dir:      PathBuf,
    recorder: CompactRecorder,
}

impl CheckpointManager {
    /// Create a new CheckpointManager rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir, recorder: CompactRecorder::new() })
    }

    pub fn checkpoint_dir(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_PREFIX}{epoch}"))
    }

    pub fn best_dir(&self) -> PathBuf {
        self.dir.join("best")
    }

    pub fn final_dir(&self) -> PathBuf {
        self.dir.join("final")
    }

    /// Save model, optimizer, metrics and state for one epoch.
    ///
    /// trainer_state.json goes last so a crash mid-save leaves a
    /// directory that `latest_checkpoint` ignores.
    pub fn save_checkpoint<B, M, O>(
        &self,
        epoch:  usize,
        model:  &M,
        optim:  &O,
        state:  &TrainerState,
        report: &EvaluationReport,
    ) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let dir = self.checkpoint_dir(epoch);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Cannot replace '{}'", dir.display()))?;
        }
        fs::create_dir_all(&dir)?;

        <CompactRecorder as Recorder<B>>::record(&self.recorder, model.clone().into_record(), dir.join(MODEL_FILE))
            .map_err(|e| anyhow!("Failed to save model to '{}': {e:?}", dir.display()))?;
        <CompactRecorder as Recorder<B>>::record(&self.recorder, optim.to_record(), dir.join(OPTIMIZER_FILE))
            .map_err(|e| anyhow!("Failed to save optimizer to '{}': {e:?}", dir.display()))?;

        write_json(&dir.join(METRICS_FILE), report)?;
        write_json(&dir.join(STATE_FILE), state)?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(dir)
    }

    /// Most recent complete checkpoint, if any.
    pub fn latest_checkpoint(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .complete_checkpoints()?
            .into_iter()
            .max_by_key(|(epoch, _)| *epoch)
            .map(|(_, dir)| dir))
    }

    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        dir:    &Path,
        model:  M,
        device: &B::Device,
    ) -> Result<M> {
        self.load_model_file(&dir.join(MODEL_FILE), model, device)
    }

    /// Load a model record from `path`, given without the `.mpk.gz`
    /// extension the recorder appends.
    pub fn load_model_file<B: Backend, M: Module<B>>(
        &self,
        path:   &Path,
        model:  M,
        device: &B::Device,
    ) -> Result<M> {
        let record = <CompactRecorder as Recorder<B>>::load::<M::Record>(&self.recorder, path.to_path_buf(), device)
            .map_err(|e| anyhow!(
                "Cannot load model record '{}'. Does the encoder configuration match? {e:?}",
                path.display()
            ))?;
        Ok(model.load_record(record))
    }

    pub fn load_optimizer<B, M, O>(&self, dir: &Path, optim: O, device: &B::Device) -> Result<O>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path   = dir.join(OPTIMIZER_FILE);
        let record = <CompactRecorder as Recorder<B>>::load::<O::Record>(&self.recorder, path.clone(), device)
            .map_err(|e| anyhow!("Cannot load optimizer record '{}': {e:?}", path.display()))?;
        Ok(optim.load_record(record))
    }

    /// Copy a complete checkpoint to `best/`, replacing the previous one.
    pub fn promote_best(&self, epoch: usize) -> Result<()> {
        let source = self.checkpoint_dir(epoch);
        if !source.join(STATE_FILE).exists() {
            bail!("checkpoint-{epoch} is incomplete and cannot be promoted");
        }

        let best = self.best_dir();
        if best.exists() {
            fs::remove_dir_all(&best)?;
        }
        copy_files(&source, &best, |_| true)?;

        tracing::info!("Checkpoint of epoch {} promoted to best", epoch);
        Ok(())
    }

    /// Keep the `limit` most recent checkpoints; 0 keeps all.
    pub fn prune(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Ok(());
        }
        self.remove_oldest(limit)
    }

    /// Remove every epoch checkpoint, leaving `best/` in place.
    pub fn remove_checkpoints(&self) -> Result<()> {
        self.remove_oldest(0)
    }

    fn remove_oldest(&self, keep: usize) -> Result<()> {
        let mut all = self.all_checkpoints()?;
        all.sort_by_key(|(epoch, _)| *epoch);
        let excess = all.len().saturating_sub(keep);
        for (epoch, dir) in all.into_iter().take(excess) {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Cannot remove '{}'", dir.display()))?;
            tracing::debug!("Pruned checkpoint of epoch {}", epoch);
        }
        Ok(())
    }

    /// Write `final/` from `best/`. Called only after training has
    /// finished.
    pub fn finalize(&self, artifact: FinalArtifact<'_>) -> Result<PathBuf> {
        let best = self.best_dir();
        if !best.join(STATE_FILE).exists() {
            bail!(
                "no evaluated best checkpoint in '{}'; the final model cannot be written",
                best.display()
            );
        }

        let out = self.final_dir();
        if out.exists() {
            fs::remove_dir_all(&out)?;
        }
        copy_files(&best, &out, |name| name.starts_with(MODEL_FILE))?;

        fs::copy(artifact.tokenizer_path, out.join("tokenizer.json")).with_context(|| {
            format!("Cannot copy tokenizer '{}'", artifact.tokenizer_path.display())
        })?;
        write_json(&out.join("training_config.json"), artifact.training_config)?;
        write_json(&out.join(METRICS_FILE), artifact.report)?;

        tracing::info!("Final model written to '{}'", out.display());
        Ok(out)
    }

    fn all_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot read '{}'", self.dir.display()))?
        {
            let path = entry?.path();
            let epoch = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|n| n.parse::<usize>().ok());
            if let (Some(epoch), true) = (epoch, path.is_dir()) {
                found.push((epoch, path));
            }
        }
        Ok(found)
    }

    fn complete_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        Ok(self
            .all_checkpoints()?
            .into_iter()
            .filter(|(_, dir)| dir.join(STATE_FILE).exists())
            .collect())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

fn copy_files(from: &Path, to: &Path, keep: impl Fn(&str) -> bool) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if path.is_file() && keep(name) {
            fs::copy(&path, to.join(name))
                .with_context(|| format!("Cannot copy '{}'", path.display()))?;
        }
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fake_checkpoint(mgr: &CheckpointManager, epoch: usize, complete: bool) {
        let dir = mgr.checkpoint_dir(epoch);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.mpk.gz"), format!("weights {epoch}")).unwrap();
        if complete {
            let mut state = TrainerState::new("f1_macro");
            state.epochs_completed = epoch;
            write_json(&dir.join(STATE_FILE), &state).unwrap();
        }
    }

    fn report() -> EvaluationReport {
        let mut metrics = BTreeMap::new();
        metrics.insert("f1_macro".to_string(), 0.6);
        EvaluationReport { metrics, thresholds: vec![0.4] }
    }

    #[test]
    fn test_latest_ignores_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path()).unwrap();
        assert!(mgr.latest_checkpoint().unwrap().is_none());

        fake_checkpoint(&mgr, 1, true);
        fake_checkpoint(&mgr, 2, false);
        assert_eq!(mgr.latest_checkpoint().unwrap(), Some(mgr.checkpoint_dir(1)));
        assert_eq!(TrainerState::load(&mgr.checkpoint_dir(1)).unwrap().epochs_completed, 1);
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path()).unwrap();
        for epoch in [1, 2, 10] {
            fake_checkpoint(&mgr, epoch, true);
        }
        mgr.prune(1).unwrap();
        assert!(!mgr.checkpoint_dir(1).exists());
        assert!(!mgr.checkpoint_dir(2).exists());
        assert!(mgr.checkpoint_dir(10).exists());

        mgr.prune(0).unwrap();
        assert!(mgr.checkpoint_dir(10).exists());
        mgr.remove_checkpoints().unwrap();
        assert!(!mgr.checkpoint_dir(10).exists());
    }

    #[test]
    fn test_incomplete_checkpoint_cannot_be_promoted() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path()).unwrap();
        fake_checkpoint(&mgr, 1, false);
        assert!(mgr.promote_best(1).is_err());
        assert!(!mgr.best_dir().exists());
    }

    #[test]
    fn test_finalize_copies_best_model_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(tmp.path().join("out")).unwrap();
        let tok = tmp.path().join("tokenizer.json");
        fs::write(&tok, "{}").unwrap();
        let cfg = serde_json::json!({ "num_labels": 1 });

        let rep = report();
        let artifact = || FinalArtifact { tokenizer_path: &tok, training_config: &cfg, report: &rep };
        assert!(mgr.finalize(artifact()).is_err());

        fake_checkpoint(&mgr, 1, true);
        fake_checkpoint(&mgr, 2, true);
        mgr.promote_best(1).unwrap();
        let out = mgr.finalize(artifact()).unwrap();

        assert_eq!(fs::read_to_string(out.join("model.mpk.gz")).unwrap(), "weights 1");
        assert!(out.join("tokenizer.json").exists());
        assert!(out.join("training_config.json").exists());
        assert!(!out.join(STATE_FILE).exists());
        let metrics: EvaluationReport =
            serde_json::from_str(&fs::read_to_string(out.join("metrics.json")).unwrap()).unwrap();
        assert_eq!(metrics.thresholds, vec![0.4]);
    }
}
