//! Command-line entry points.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::server::serve_until_ctrl_c;
use crate::batch::process_directory;
use crate::config::AppConfig;
use crate::core_state::{rebuild_index, CoreState};
use crate::pipeline::evaluation::{analyze_directory, EvaluationSummary};
use crate::pipeline::reference::{load_vocabulary, ReferenceValidator};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "icd-coder")]
#[command(version, about = "ICD-10-CM coding of clinical notes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API
    Serve,
    /// Code every inputs/input{N}.txt under DIR into preds/pred{N}.json
    Process {
        /// Data directory containing inputs/
        dir: PathBuf,
    },
    /// Compare preds/ against outputs/ under DIR
    Evaluate {
        /// Data directory containing inputs/, outputs/ and preds/
        dir: PathBuf,
        /// Where to write the per-pair analysis
        #[arg(long, default_value = "analysis_results.json")]
        output: PathBuf,
    },
    /// Rebuild the vector index cache from the vocabulary
    BuildIndex,
}

pub fn execute(cli: Cli) -> CliResult {
    let config = AppConfig::from_env()?;
    match cli.command {
        Commands::Serve => serve(&config),
        Commands::Process { dir } => process(&config, &dir),
        Commands::Evaluate { dir, output } => evaluate(&config, &dir, &output),
        Commands::BuildIndex => {
            let retriever = rebuild_index(&config)?;
            println!(
                "Indexed {} codes with {} into {}",
                retriever.len(),
                retriever.model_name(),
                config.cache_dir.display()
            );
            Ok(())
        }
    }
}

// State is built and dropped outside the runtime: the embedding client blocks.
fn serve(config: &AppConfig) -> CliResult {
    let core = Arc::new(CoreState::initialize(config)?);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve_until_ctrl_c(Arc::clone(&core), config.bind))?;
    drop(runtime);
    Ok(())
}

fn process(config: &AppConfig, dir: &Path) -> CliResult {
    let core = CoreState::initialize(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(process_directory(core.processor(), dir))?;
    drop(runtime);

    println!(
        "Processed {} notes, {} failed",
        report.written.len() + report.failed.len(),
        report.failed.len()
    );
    for (input, error) in &report.failed {
        eprintln!("  {input}: {error}");
    }
    Ok(())
}

fn evaluate(config: &AppConfig, dir: &Path, output: &Path) -> CliResult {
    let validator = ReferenceValidator::new(load_vocabulary(&config.vocabulary_path)?)?;
    let results = analyze_directory(dir, &validator)?;
    std::fs::write(output, serde_json::to_string_pretty(&results)?)?;

    let summary = EvaluationSummary::from_results(&results);
    println!("Analysis complete. Results saved to {}", output.display());
    println!("Total file pairs analyzed: {}", summary.total_pairs);
    println!("Average Jaccard similarity: {:.3}", summary.average_jaccard);
    Ok(())
}
