// ============================================================
// Layer 2 — Pipeline
// ============================================================
// Runs a selection of stages in their fixed order:
//
//   conversion → dataset → download → tokenize → train
//
// The order does not depend on how the steps were listed, and
// the first failing step stops the run.
//
// Existing outputs:
//   - force_clean removes a stage's outputs before it runs
//   - otherwise, when a stage's output is already complete, the
//     `Prompt` decides whether to reuse it. The interactive menu
//     asks on stdin; subcommands use `NoPrompt` and rebuild.
//   - a tokenization cut short (no dataset_info.json yet) is
//     resumed, never cleaned; rebuilding the dataset removes it

use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::{bail, Context, Result};

use crate::application::{
    convert_use_case::ConvertUseCase,
    dataset_use_case::DatasetUseCase,
    download_use_case::DownloadUseCase,
    tokenize_use_case::TokenizeUseCase,
    train_use_case::TrainUseCase,
};
use crate::data::dataset::{DatasetDict, DatasetInfo};
use crate::infra::config::PipelineConfig;
use crate::ml::trainer::training_loop_for;

// ─── Steps ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Conversion,
    Dataset,
    Download,
    Tokenize,
    Train,
}

impl Step {
    /// The data pipeline; training is run on its own.
    pub const DATA: [Step; 4] = [Step::Conversion, Step::Dataset, Step::Download, Step::Tokenize];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Conversion => "conversion",
            Step::Dataset    => "dataset",
            Step::Download   => "download",
            Step::Tokenize   => "tokenize",
            Step::Train      => "train",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conversion" | "convert" => Ok(Step::Conversion),
            "dataset"                => Ok(Step::Dataset),
            "download"               => Ok(Step::Download),
            "tokenize"               => Ok(Step::Tokenize),
            "train"                  => Ok(Step::Train),
            other => bail!("unknown step '{other}' (expected conversion, dataset, download, tokenize or train)"),
        }
    }
}

// ─── Prompt ───────────────────────────────────────────────────────────────────
/// Asks whether an existing, complete output should be reused.
pub trait Prompt {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Never reuses; every selected stage runs.
pub struct NoPrompt;

impl Prompt for NoPrompt {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(false)
    }
}

// ─── Options / results ────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub steps:         Vec<Step>,
    pub force_clean:   bool,
    pub skip_download: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { steps: Step::DATA.to_vec(), force_clean: false, skip_download: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    /// Ran; carries the stage's one-line summary
    Done(String),
    Reused,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step:   Step,
    pub status: StepStatus,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            StepStatus::Done(summary) => write!(f, "{:<10} done: {}", self.step, summary),
            StepStatus::Reused        => write!(f, "{:<10} reused existing output", self.step),
            StepStatus::Skipped       => write!(f, "{:<10} skipped", self.step),
        }
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    prompt: &'a dyn Prompt,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, prompt: &'a dyn Prompt) -> Self {
        Self { config, prompt }
    }

    pub fn run(&self, options: &RunOptions) -> Result<Vec<StepResult>> {
        let mut steps = options.steps.clone();
        steps.sort();
        steps.dedup();

        tracing::info!(
            "Running steps [{}] (force_clean={}) for model '{}' with {} labels",
            steps.iter().map(Step::name).collect::<Vec<_>>().join(", "),
            options.force_clean,
            self.config.model_name,
            self.config.num_labels
        );

        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            tracing::info!("━━━ Step: {} ━━━", step);
            let status = self
                .run_step(step, options)
                .with_context(|| format!("step '{step}' failed"))?;
            results.push(StepResult { step, status });
        }
        Ok(results)
    }

    fn run_step(&self, step: Step, options: &RunOptions) -> Result<StepStatus> {
        let cfg   = self.config;
        let paths = &cfg.paths;

        match step {
            Step::Conversion => {
                if options.force_clean {
                    for file in [&paths.converted_csv_path, &paths.cleaned_jsonl_path, &paths.final_jsonl] {
                        remove_file(file)?;
                    }
                } else if paths.final_jsonl.exists()
                    && self.prompt.confirm(&format!(
                        "Labeled records already exist at '{}'. Skip conversion?",
                        paths.final_jsonl.display()
                    ))?
                {
                    return Ok(StepStatus::Reused);
                }
                let summary = ConvertUseCase::new(cfg).execute()?;
                Ok(StepStatus::Done(summary.to_string()))
            }

            Step::Dataset => {
                let dir = &paths.dataset_dir;
                if !options.force_clean
                    && DatasetDict::path(dir).exists()
                    && self.prompt.confirm(&format!(
                        "Dataset already exists at '{}'. Reuse it?",
                        dir.display()
                    ))?
                {
                    return Ok(StepStatus::Reused);
                }
                remove_dir(dir)?;
                // chunks of the old split must not be resumed into the new one
                remove_dir(&paths.tokenized_dir)?;
                let summary = DatasetUseCase::new(cfg).execute()?;
                Ok(StepStatus::Done(summary.to_string()))
            }

            Step::Download => {
                if options.skip_download {
                    return Ok(StepStatus::Skipped);
                }
                let summary = DownloadUseCase::new(cfg).execute()?;
                Ok(StepStatus::Done(summary.to_string()))
            }

            Step::Tokenize => {
                let dir      = &paths.tokenized_dir;
                let complete = DatasetInfo::path(dir).exists();
                if options.force_clean {
                    remove_dir(dir)?;
                } else if complete {
                    if self.prompt.confirm(&format!(
                        "Tokenized dataset already exists at '{}'. Reuse it?",
                        dir.display()
                    ))? {
                        return Ok(StepStatus::Reused);
                    }
                    remove_dir(dir)?;
                }
                let summary = TokenizeUseCase::new(cfg).execute()?;
                Ok(StepStatus::Done(summary.to_string()))
            }

            Step::Train => {
                let training_loop = training_loop_for(cfg.encoder.device);
                let summary = TrainUseCase::new(cfg, training_loop).execute()?;
                Ok(StepStatus::Done(summary.to_string()))
            }
        }
    }
}

fn remove_file(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Cannot remove '{}'", path.display()))?;
        tracing::info!("Removed '{}'", path.display());
    }
    Ok(())
}

fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("Cannot remove '{}'", path.display()))?;
        tracing::info!("Removed '{}'", path.display());
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{test_config, write_inputs};
    use crate::data::dataset::completed_path;
    use crate::infra::tokenizer_store::TokenizerStore;
    use std::cell::RefCell;

    /// Answers yes and remembers every question.
    struct Yes {
        asked: RefCell<Vec<String>>,
    }

    impl Prompt for Yes {
        fn confirm(&self, question: &str) -> Result<bool> {
            self.asked.borrow_mut().push(question.to_string());
            Ok(true)
        }
    }

    fn steps(list: &[Step]) -> RunOptions {
        RunOptions { steps: list.to_vec(), ..RunOptions::default() }
    }

    #[test]
    fn test_step_parsing_and_order() {
        assert_eq!("Tokenize".parse::<Step>().unwrap(), Step::Tokenize);
        assert_eq!("convert".parse::<Step>().unwrap(), Step::Conversion);
        assert!("deploy".parse::<Step>().is_err());
        let mut s = vec![Step::Train, Step::Conversion, Step::Tokenize];
        s.sort();
        assert_eq!(s, vec![Step::Conversion, Step::Tokenize, Step::Train]);
    }

    #[test]
    fn test_data_steps_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let cfg = test_config(dir.path());

        let results = Pipeline::new(&cfg, &NoPrompt)
            .run(&steps(&[Step::Dataset, Step::Conversion]))
            .unwrap();
        assert_eq!(results[0].step, Step::Conversion);
        assert_eq!(results[1].step, Step::Dataset);
        assert!(matches!(results[1].status, StepStatus::Done(_)));
        assert!(DatasetDict::path(&cfg.paths.dataset_dir).exists());
    }

    #[test]
    fn test_existing_output_reused_on_confirm() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let cfg = test_config(dir.path());
        Pipeline::new(&cfg, &NoPrompt).run(&steps(&[Step::Conversion])).unwrap();

        let yes = Yes { asked: RefCell::new(Vec::new()) };
        let results = Pipeline::new(&cfg, &yes).run(&steps(&[Step::Conversion])).unwrap();
        assert_eq!(results[0].status, StepStatus::Reused);
        assert_eq!(yes.asked.borrow().len(), 1);

        // force_clean never asks
        let forced = RunOptions { force_clean: true, ..steps(&[Step::Conversion]) };
        let results = Pipeline::new(&cfg, &yes).run(&forced).unwrap();
        assert!(matches!(results[0].status, StepStatus::Done(_)));
        assert_eq!(yes.asked.borrow().len(), 1);
    }

    #[test]
    fn test_dataset_rebuild_clears_tokenized_output() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let cfg = test_config(dir.path());
        Pipeline::new(&cfg, &NoPrompt).run(&steps(&[Step::Conversion])).unwrap();

        let stale = completed_path(&cfg.paths.tokenized_dir, "train");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "A\n").unwrap();

        Pipeline::new(&cfg, &NoPrompt).run(&steps(&[Step::Dataset])).unwrap();
        assert!(!cfg.paths.tokenized_dir.exists());
    }

    #[test]
    fn test_skip_download() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let opts = RunOptions { skip_download: true, ..steps(&[Step::Download]) };
        let results = Pipeline::new(&cfg, &NoPrompt).run(&opts).unwrap();
        assert_eq!(results[0].status, StepStatus::Skipped);
        assert!(!TokenizerStore::new(&cfg.paths.tokenizer_path).exists());
    }

    #[test]
    fn test_failure_names_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let err = Pipeline::new(&cfg, &NoPrompt)
            .run(&steps(&[Step::Conversion]))
            .unwrap_err();
        assert!(err.to_string().contains("conversion"));
    }
}
