// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Fine-tunes the classifier with Burn's DataLoader and AdamW.
//
// The application layer only sees the `TrainingLoop` trait:
//
//   TrainJob ──► TrainingLoop::run ──► TrainOutcome
//
// `BurnTrainingLoop<B>` is the implementation. Per epoch:
//
//   1. train    forward + weighted BCE, gradients accumulated
//               over `gradient_accumulation_steps` batches,
//               then one AdamW step at the scheduled rate
//   2. evaluate model.valid() on B::InnerBackend (no autodiff),
//               sigmoid probabilities → EvaluationReport
//   3. save     checkpoint-<epoch>/ with model, optimizer and
//               trainer state; promote to best/ when the
//               configured metric improved; prune old ones
//
// A checkpoint is only promoted after its evaluation finished,
// and resume restarts from the first epoch after the latest
// complete checkpoint.
//
// Key Burn insight:
//   - Training uses B (Autodiff<...>) for gradients
//   - model.valid() returns the model on B::InnerBackend
//   - the validation batcher must also use B::InnerBackend

use std::path::PathBuf;

use anyhow::{anyhow, bail, ensure, Result};
use burn::{
    backend::{
        ndarray::NdArrayDevice,
        wgpu::WgpuDevice,
        Autodiff, NdArray, Wgpu,
    },
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::sigmoid, backend::AutodiffBackend},
};

use crate::data::{
    batcher::{ChunkBatch, ChunkBatcher},
    dataset::ChunkDataset,
};
use crate::infra::checkpoint::{CheckpointManager, TrainerState};
use crate::infra::config::{Aggregation, ComputeDevice, IntervalStrategy, SchedulerType, TrainingArgs};
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::evaluation::{evaluate, is_improvement, known_metric, EvaluationReport, Predictions};
use crate::ml::model::{weighted_bce_with_logits, EsgClassifier, EsgClassifierConfig};

// ─── Job / Outcome ────────────────────────────────────────────────────────────
/// Everything one training run needs.
pub struct TrainJob {
    pub train:             ChunkDataset,
    pub validation:        ChunkDataset,
    pub model:             EsgClassifierConfig,
    /// Positive-class weight per criterion
    pub pos_weight:        Vec<f32>,
    /// Criterion ids in label order, for metric names
    pub criteria:          Vec<String>,
    pub args:              TrainingArgs,
    /// Where checkpoints, best/ and metrics.csv go
    pub output_dir:        PathBuf,
    /// Burn record to initialise the model from
    pub pretrained_record: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    /// Directory holding the promoted best checkpoint
    pub best_checkpoint: PathBuf,
    pub best_epoch:      usize,
    pub best_metric:     f64,
    pub best_report:     EvaluationReport,
    pub epochs_run:      usize,
    pub global_step:     usize,
}

/// The seam between the use case and the training machinery.
pub trait TrainingLoop {
    fn run(&self, job: TrainJob) -> Result<TrainOutcome>;
}

/// Pick the Burn backend for the configured device.
pub fn training_loop_for(device: ComputeDevice) -> Box<dyn TrainingLoop> {
    match device {
        ComputeDevice::Wgpu => {
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            Box::new(BurnTrainingLoop::<Autodiff<Wgpu>>::new(device))
        }
        ComputeDevice::Cpu => {
            tracing::info!("Using NdArray CPU backend");
            Box::new(BurnTrainingLoop::<Autodiff<NdArray>>::new(NdArrayDevice::Cpu))
        }
    }
}

// ─── Learning-rate schedule ───────────────────────────────────────────────────
/// Learning rate for optimizer step `step` (0-based) of `total_steps`.
///
/// linear:   0 → lr over the warmup steps, then lr → 0 at the end
/// constant: lr throughout
pub fn learning_rate_at(args: &TrainingArgs, step: usize, total_steps: usize) -> f64 {
    let lr = args.learning_rate;
    match args.lr_scheduler_type {
        SchedulerType::Constant => lr,
        SchedulerType::Linear => {
            let warmup = args.warmup_steps;
            if step < warmup {
                lr * step as f64 / warmup.max(1) as f64
            } else {
                let remaining = total_steps.saturating_sub(step) as f64;
                let decay     = total_steps.saturating_sub(warmup).max(1) as f64;
                lr * remaining / decay
            }
        }
    }
}

// ─── BurnTrainingLoop ─────────────────────────────────────────────────────────
pub struct BurnTrainingLoop<B: AutodiffBackend> {
    device: B::Device,
}

impl<B: AutodiffBackend> BurnTrainingLoop<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Run the validation split through the model and score it.
    fn evaluate(
        &self,
        model:      &EsgClassifier<B::InnerBackend>,
        loader:     &dyn DataLoader<ChunkBatch<B::InnerBackend>>,
        pos_weight: &Tensor<B::InnerBackend, 1>,
        criteria:   &[String],
        aggregation: Aggregation,
    ) -> Result<EvaluationReport> {
        let mut preds     = Predictions::default();
        let mut loss_sum  = 0.0f64;
        let mut batches   = 0usize;

        for batch in loader.iter() {
            let logits = model.forward(batch.input_ids, batch.attention_mask);
            let loss   = weighted_bce_with_logits(logits.clone(), batch.targets, pos_weight.clone());
            loss_sum += loss.into_scalar().elem::<f64>();
            batches  += 1;

            let probs: Vec<f32> = sigmoid(logits)
                .into_data()
                .convert::<f32>()
                .to_vec()
                .map_err(|e| anyhow!("Cannot read validation probabilities: {e:?}"))?;
            preds.push_batch(batch.document_ids, &probs, &batch.labels);
        }

        let eval_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
        Ok(evaluate(&preds, criteria, eval_loss, aggregation))
    }
}

impl<B: AutodiffBackend> TrainingLoop for BurnTrainingLoop<B> {
    fn run(&self, job: TrainJob) -> Result<TrainOutcome> {
        let args   = job.args.clone();
        let device = &self.device;

        ensure!(job.train.len() > 0, "training split has no chunks");
        ensure!(job.validation.len() > 0, "validation split has no chunks");
        if !known_metric(&args.metric_for_best_model, &job.criteria) {
            bail!("metric_for_best_model '{}' is not produced by evaluation", args.metric_for_best_model);
        }
        if args.fp16 {
            tracing::warn!("fp16 requested; precision follows the backend's float element type");
        }

        B::seed(args.seed);
        let ckpt = CheckpointManager::new(&job.output_dir)?;

        // ── Build model ───────────────────────────────────────────────────────
        let mut model: EsgClassifier<B> = job.model.init(device);
        if let Some(record) = &job.pretrained_record {
            // CompactRecorder appends its own extension
            let base = PathBuf::from(record.to_string_lossy().trim_end_matches(".mpk.gz"));
            model = ckpt.load_model_file::<B, _>(&base, model, device)?;
            tracing::info!("Initialised encoder from '{}'", record.display());
        }
        tracing::info!(
            "Model ready: {} layers, d_model={}, {} labels",
            job.model.num_layers, job.model.d_model, job.model.num_labels
        );

        // ── AdamW optimiser ───────────────────────────────────────────────────
        let mut optim = AdamWConfig::new()
            .with_weight_decay(args.weight_decay as f32)
            .with_grad_clipping(args.max_grad_norm.map(GradientClippingConfig::Norm))
            .init::<B, EsgClassifier<B>>();

        // ── Resume ────────────────────────────────────────────────────────────
        let mut state = TrainerState::new(&args.metric_for_best_model);
        if args.resume_from_checkpoint {
            if let Some(dir) = ckpt.latest_checkpoint()? {
                model = ckpt.load_model::<B, _>(&dir, model, device)?;
                optim = ckpt.load_optimizer::<B, EsgClassifier<B>, _>(&dir, optim, device)?;
                state = TrainerState::load(&dir)?;
                tracing::info!(
                    "Resuming from '{}' (epoch {}, step {})",
                    dir.display(), state.epochs_completed, state.global_step
                );
            }
        } else {
            // checkpoints of an earlier run would outrank this run's in pruning
            ckpt.remove_checkpoints()?;
        }
        let logger = MetricsLogger::new(&job.output_dir, state.epochs_completed == 0)?;
        tracing::info!("Epoch metrics → '{}'", logger.csv_path().display());

        // ── Schedule ──────────────────────────────────────────────────────────
        let accum           = args.gradient_accumulation_steps;
        let batches         = job.train.len().div_ceil(args.per_device_train_batch_size);
        let steps_per_epoch = batches.div_ceil(accum);
        let total_steps     = steps_per_epoch * args.num_train_epochs;
        tracing::info!(
            "{} training chunks, {} batches/epoch, {} optimizer steps in total",
            job.train.len(), batches, total_steps
        );

        let pos_weight       = Tensor::<B, 1>::from_data(
            TensorData::new(job.pos_weight.clone(), [job.pos_weight.len()]),
            device,
        );
        let pos_weight_valid = pos_weight.clone().inner();

        // ── Data loaders ──────────────────────────────────────────────────────
        let train_loader = DataLoaderBuilder::new(ChunkBatcher::<B>::new(device.clone()))
            .batch_size(args.per_device_train_batch_size)
            .shuffle(args.seed + state.epochs_completed as u64)
            .num_workers(1)
            .build(job.train);

        let valid_loader = DataLoaderBuilder::new(ChunkBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(args.per_device_eval_batch_size)
            .num_workers(1)
            .build(job.validation);

        // ── Epoch loop ────────────────────────────────────────────────────────
        let first_epoch = state.epochs_completed + 1;
        let mut epochs_run = 0usize;

        for epoch in first_epoch..=args.num_train_epochs {
            let mut accumulator = GradientsAccumulator::<EsgClassifier<B>>::new();
            let mut pending     = 0usize;
            let mut loss_sum    = 0.0f64;
            let mut seen        = 0usize;
            let mut lr          = 0.0f64;

            for batch in train_loader.iter() {
                let (loss, _) = model.forward_loss(
                    batch.input_ids,
                    batch.attention_mask,
                    batch.targets,
                    pos_weight.clone(),
                );
                loss_sum += loss.clone().into_scalar().elem::<f64>();
                seen     += 1;

                // Scale so accumulated gradients average over the group
                let grads = GradientsParams::from_grads((loss / accum as f64).backward(), &model);
                accumulator.accumulate(&model, grads);
                pending += 1;

                if pending == accum {
                    lr    = learning_rate_at(&args, state.global_step, total_steps);
                    model = optim.step(lr, model, accumulator.grads());
                    state.global_step += 1;
                    pending = 0;
                }
            }
            if pending > 0 {
                lr    = learning_rate_at(&args, state.global_step, total_steps);
                model = optim.step(lr, model, accumulator.grads());
                state.global_step += 1;
            }

            let train_loss = if seen > 0 { loss_sum / seen as f64 } else { f64::NAN };

            // ── Evaluation ────────────────────────────────────────────────────
            let report = self.evaluate(
                &model.valid(),
                valid_loader.as_ref(),
                &pos_weight_valid,
                &job.criteria,
                args.document_aggregation,
            )?;
            let metric = report
                .metric(&args.metric_for_best_model)
                .ok_or_else(|| anyhow!("evaluation did not produce '{}'", args.metric_for_best_model))?;

            let row = EpochMetrics::from_report(epoch, state.global_step, lr, train_loss, &report);
            logger.log(&row)?;
            println!(
                "Epoch {:>3}/{} | train_loss={:.4} | eval_loss={:.4} | f1_macro={:.3} | f1_macro@0.5={:.3} | doc_f1_macro={:.3}",
                epoch, args.num_train_epochs, row.train_loss, row.eval_loss,
                row.f1_macro, row.f1_macro_default, row.doc_f1_macro,
            );

            let improved = is_improvement(metric, state.best_metric, args.greater_is_better);
            state.epochs_completed = epoch;
            state.log_history.push(row);
            if improved {
                state.best_metric = Some(metric);
                state.best_epoch  = Some(epoch);
                state.best_report = Some(report.clone());
            }

            // ── Checkpoint ────────────────────────────────────────────────────
            if args.save_strategy == IntervalStrategy::Epoch || improved {
                ckpt.save_checkpoint::<B, _, _>(epoch, &model, &optim, &state, &report)?;
                if improved {
                    ckpt.promote_best(epoch)?;
                }
                if args.save_strategy == IntervalStrategy::Epoch {
                    ckpt.prune(args.save_total_limit)?;
                } else {
                    ckpt.remove_checkpoints()?;
                }
            }
            epochs_run += 1;
        }

        let (Some(best_epoch), Some(best_metric), Some(best_report)) =
            (state.best_epoch, state.best_metric, state.best_report.clone())
        else {
            bail!("training finished without a fully evaluated checkpoint");
        };
        tracing::info!(
            "Training complete: best {}={:.4} at epoch {}",
            args.metric_for_best_model, best_metric, best_epoch
        );

        Ok(TrainOutcome {
            best_checkpoint: ckpt.best_dir(),
            best_epoch,
            best_metric,
            best_report,
            epochs_run,
            global_step: state.global_step,
        })
    }
}
