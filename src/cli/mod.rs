// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// The configuration file is read exactly once, here, and the
// resulting PipelineConfig is passed by reference to every
// use case.
//
// Without a subcommand the interactive menu opens.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use commands::Commands;

use crate::application::pipeline::{NoPrompt, Pipeline, Prompt, RunOptions, Step, StepResult};
use crate::infra::config::PipelineConfig;

/// The main CLI struct — clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "esg-pipeline",
    version,
    about = "Prepare expert-scored ESG reports and fine-tune a multi-label classifier."
)]
pub struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// The subcommand to run; the interactive menu when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Load the configuration and dispatch to the chosen command.
    /// This keeps the CLI layer thin — it only routes, never computes.
    pub fn run(self) -> Result<()> {
        let config = PipelineConfig::load(&self.config)?;

        match self.command.unwrap_or(Commands::Menu) {
            Commands::Run(args)      => run_steps(&config, &NoPrompt, args.into()),
            Commands::Convert        => run_steps(&config, &NoPrompt, single(Step::Conversion, false)),
            Commands::Dataset        => run_steps(&config, &NoPrompt, single(Step::Dataset, false)),
            Commands::Download       => run_steps(&config, &NoPrompt, single(Step::Download, false)),
            Commands::Tokenize(args) => run_steps(&config, &NoPrompt, single(Step::Tokenize, args.force_clean)),
            Commands::Train          => run_steps(&config, &NoPrompt, single(Step::Train, false)),
            Commands::ShowConfig     => show_config(&config),
            Commands::Menu           => menu(&config),
        }
    }
}

fn single(step: Step, force_clean: bool) -> RunOptions {
    RunOptions { steps: vec![step], force_clean, skip_download: false }
}

/// Run the pipeline and print one line per step.
fn run_steps(config: &PipelineConfig, prompt: &dyn Prompt, options: RunOptions) -> Result<()> {
    println!("Model:        {}", config.model_name);
    println!("Labels:       {} ({})", config.num_labels, config.problem_type);
    println!(
        "Steps:        {}",
        options.steps.iter().map(Step::name).collect::<Vec<_>>().join(", ")
    );
    println!("Force clean:  {}", options.force_clean);

    let results: Vec<StepResult> = Pipeline::new(config, prompt).run(&options)?;

    println!();
    for r in &results {
        println!("  {r}");
    }
    if !options.steps.contains(&Step::Train) {
        println!("\nReady for training: esg-pipeline train");
    }
    Ok(())
}

fn show_config(config: &PipelineConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

// ─── Interactive menu ─────────────────────────────────────────────────────────
/// Asks on stdin; anything but y/yes is a no.
struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        let answer = read_line(&format!("{question} (y/n): "))?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Cannot read from stdin")?;
    Ok(line.trim().to_string())
}

const MENU: &str = "
============================================================
 ESG MODEL TRAINING PIPELINE
============================================================
 DATA PIPELINE
   1. Run full data pipeline (conversion → dataset → download → tokenize)
   2. Run data conversion only
   3. Run dataset creation only
   4. Run tokenizer download only
   5. Run tokenization only

 TRAINING
   6. Train ESG model

 MAINTENANCE
   7. Clean all intermediate files and run full data pipeline
   8. Show current configuration
   0. Exit
";

fn menu(config: &PipelineConfig) -> Result<()> {
    println!("{MENU}");

    let choice = loop {
        let input = read_line("Enter your choice (0-8): ")?;
        match input.parse::<u8>() {
            Ok(n) if n <= 8 => break n,
            _ => println!("Invalid choice. Please enter a number between 0 and 8."),
        }
    };

    let prompt = StdinPrompt;
    let data   = |force_clean| RunOptions { steps: Step::DATA.to_vec(), force_clean, skip_download: false };

    match choice {
        0 => {
            println!("Goodbye!");
            Ok(())
        }
        1 => run_steps(config, &prompt, data(false)),
        2 => run_steps(config, &prompt, single(Step::Conversion, false)),
        3 => run_steps(config, &prompt, single(Step::Dataset, false)),
        4 => run_steps(config, &prompt, single(Step::Download, false)),
        5 => run_steps(config, &prompt, single(Step::Tokenize, false)),
        6 => run_steps(config, &prompt, single(Step::Train, false)),
        7 => run_steps(config, &prompt, data(true)),
        _ => show_config(config),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use commands::StepArg;

    #[test]
    fn test_bare_invocation_opens_menu() {
        let cli = Cli::parse_from(["esg-pipeline"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn test_run_parses_steps_and_flags() {
        let cli = Cli::parse_from([
            "esg-pipeline", "--config", "cfg/esg.json",
            "run", "--steps", "tokenize,conversion", "--force-clean",
        ]);
        assert_eq!(cli.config, PathBuf::from("cfg/esg.json"));
        let Some(Commands::Run(args)) = cli.command else { panic!("expected run") };
        assert_eq!(args.steps, vec![StepArg::Tokenize, StepArg::Conversion]);

        let options: RunOptions = args.into();
        assert!(options.force_clean);
        assert!(!options.skip_download);
        assert_eq!(options.steps, vec![Step::Tokenize, Step::Conversion]);
    }

    #[test]
    fn test_run_without_steps_is_data_pipeline() {
        let cli = Cli::parse_from(["esg-pipeline", "run", "--skip-download"]);
        let Some(Commands::Run(args)) = cli.command else { panic!("expected run") };
        let options: RunOptions = args.into();
        assert_eq!(options.steps, Step::DATA.to_vec());
        assert!(options.skip_download);
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        assert!(Cli::try_parse_from(["esg-pipeline", "run", "--steps", "deploy"]).is_err());
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::parse_from(["esg-pipeline", "show-config", "--config", "other.json"]);
        assert!(matches!(cli.command, Some(Commands::ShowConfig)));
        assert_eq!(cli.config, PathBuf::from("other.json"));
    }
}
