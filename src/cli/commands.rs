// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// One subcommand per pipeline stage, `run` for a selection of
// stages, `show-config`, and `menu` (also what a bare
// invocation opens).
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for unknown steps
//   - type conversion (string → Step via ValueEnum)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};

use crate::application::pipeline::{RunOptions, Step};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run several stages in pipeline order (default: the data pipeline)
    Run(RunArgs),

    /// Normalize scores, clean texts and merge them into labeled records
    Convert,

    /// Split labeled records into train / validation
    Dataset,

    /// Fetch or build the tokenizer
    Download,

    /// Tokenize and chunk both splits (resumable)
    Tokenize(TokenizeArgs),

    /// Fine-tune the classifier and write the final model
    Train,

    /// Print the effective configuration as JSON
    ShowConfig,

    /// Interactive menu
    Menu,
}

/// Stage names accepted by `run --steps`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepArg {
    Conversion,
    Dataset,
    Download,
    Tokenize,
    Train,
}

impl From<StepArg> for Step {
    fn from(s: StepArg) -> Self {
        match s {
            StepArg::Conversion => Step::Conversion,
            StepArg::Dataset    => Step::Dataset,
            StepArg::Download   => Step::Download,
            StepArg::Tokenize   => Step::Tokenize,
            StepArg::Train      => Step::Train,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stages to run; they always execute in pipeline order
    #[arg(long, value_enum, num_args = 1.., value_delimiter = ',')]
    pub steps: Vec<StepArg>,

    /// Remove each selected stage's existing outputs first
    #[arg(long)]
    pub force_clean: bool,

    /// Leave the download stage out even if selected
    #[arg(long)]
    pub skip_download: bool,
}

/// Convert CLI RunArgs into the application-layer RunOptions.
/// The application layer never sees clap types.
impl From<RunArgs> for RunOptions {
    fn from(a: RunArgs) -> Self {
        let steps = if a.steps.is_empty() {
            Step::DATA.to_vec()
        } else {
            a.steps.into_iter().map(Step::from).collect()
        };
        RunOptions { steps, force_clean: a.force_clean, skip_download: a.skip_download }
    }
}

#[derive(Args, Debug)]
pub struct TokenizeArgs {
    /// Discard partial output instead of resuming
    #[arg(long)]
    pub force_clean: bool,
}
