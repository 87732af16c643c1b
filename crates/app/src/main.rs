//! Command-line shell around the document pipeline.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docuflow_core::{DocumentType, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docuflow", version, about = "Batch document detection, OCR and structuring")]
struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Result store root, overriding the config file.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every image found in a directory.
    Run {
        /// Directory to scan for input images.
        input: PathBuf,
    },
    /// Process the given image files.
    Process {
        /// Image files to process.
        files: Vec<PathBuf>,
        /// Declared document type, skipping the classifier.
        #[arg(long)]
        hint: Option<DocumentType>,
    },
    /// Watch a directory and process images as they appear.
    Watch {
        /// Directory to watch for new scans.
        input: PathBuf,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => PipelineConfig::load(&path)?,
            _ => PipelineConfig::default(),
        },
    };
    config.apply_env();
    if let Some(output) = &cli.output {
        config.output.root = output.clone();
    }
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "docuflow", "docuflow")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Run { input } => commands::run_directory(&config, &input).await,
        Command::Process { files, hint } => commands::process_files(&config, files, hint).await,
        Command::Watch { input } => commands::watch_directory(&config, &input).await,
    }
}
