use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use taxdoc::config::{self, ConfigError, ModelConfig};
use taxdoc::pipeline::container::MsgUnpacker;
use taxdoc::pipeline::diagnostic::{summarize_parts, PartSummary};
use taxdoc::pipeline::import::{collect_inputs, DocumentSection, ImportError, SourceFile};
use taxdoc::pipeline::processor::{build_processor, prepare_batch, ProcessingError};

#[derive(Parser, Debug)]
#[command(name = "taxdoc")]
#[command(version)]
#[command(about = "Turn a client's rental tax documents into a summary workbook and audit archive")]
struct Cli {
    /// Current-year documents: files or folders (walked recursively)
    #[arg(value_name = "INPUTS", required = true)]
    inputs: Vec<PathBuf>,

    /// Last year's return, used for prior-year columns only
    #[arg(long, value_name = "PATH")]
    prior: Vec<PathBuf>,

    /// Preparer template, used for category names only
    #[arg(long, value_name = "PATH")]
    template: Vec<PathBuf>,

    /// Where to write the audit ZIP (default: Tax_Package_<timestamp>.zip)
    #[arg(long, short = 'o', value_name = "ZIP")]
    output: Option<PathBuf>,

    /// Tax year being prepared; the model infers it when omitted
    #[arg(long, value_name = "YEAR")]
    tax_year: Option<i32>,

    /// Print the manifest and part summary without calling the model
    #[arg(long)]
    dry_run: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("Could not write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Serialize)]
struct DryRunReport {
    manifest: Vec<String>,
    parts: Vec<PartSummary>,
}

fn main() -> ExitCode {
    taxdoc::init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let files = load_bundle(&cli)?;

    if cli.dry_run {
        let batch = prepare_batch(&MsgUnpacker, config::MAX_FILE_BYTES, &files);
        let report = DryRunReport {
            parts: summarize_parts(&batch.parts),
            manifest: batch.manifest.into_vec(),
        };
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "Could not render dry-run report"),
        }
        return Ok(());
    }

    let model_config = ModelConfig::from_env()?;
    let processor = build_processor(&model_config)?.with_tax_year(cli.tax_year);
    let output = processor.process(&files)?;

    let path = cli.output.unwrap_or_else(default_output_path);
    std::fs::write(&path, &output.archive).map_err(|source| CliError::Write {
        path: path.display().to_string(),
        source,
    })?;

    println!("Wrote {}", path.display());
    println!(
        "  properties: {}  files read: {}  unused: {}",
        output.summary.properties,
        output.summary.files_detected,
        output.summary.unused_files.len()
    );
    for unused in &output.summary.unused_files {
        println!("    not cited: {unused}");
    }
    if output.summary.has_email_draft {
        println!("  client email draft included ({})", config::EMAIL_DRAFT_FILE_NAME);
    }
    Ok(())
}

fn load_bundle(cli: &Cli) -> Result<Vec<SourceFile>, CliError> {
    let mut files = collect_inputs(&cli.inputs, DocumentSection::Current)?;
    files.extend(collect_inputs(&cli.prior, DocumentSection::PriorYear)?);
    files.extend(collect_inputs(&cli.template, DocumentSection::Template)?);

    if files.is_empty() {
        return Err(ImportError::NothingToProcess.into());
    }
    Ok(files)
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "Tax_Package_{}.zip",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}
