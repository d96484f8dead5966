use std::path::Path;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use labcas_croissant::app::{App, ProgressSink, Variant};
use labcas_croissant::catalog::{CatalogClient, LabcasHttpClient};
use labcas_croissant::config::{ConfigLoader, Credentials, ResolvedConfig};
use labcas_croissant::error::LabcasError;
use labcas_croissant::output::{HumanOutput, JsonOutput, LogSink, OutputMode};

#[derive(Parser)]
#[command(name = "labcas-croissant")]
#[command(about = "Harvest LabCAS imaging metadata into PROC/MASK manifests and Croissant descriptions")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./labcas.json, then the user config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Harvest collection, dataset and file metadata snapshots")]
    Harvest,
    #[command(about = "Build the PROC/MASK manifest and mini manifest from snapshots")]
    Manifest,
    #[command(about = "Generate the Croissant description from a manifest")]
    Describe(VariantArgs),
    #[command(about = "Load a description and show its records")]
    Inspect(VariantArgs),
    #[command(about = "Download the PROC/MASK files referenced by a description")]
    Fetch(FetchArgs),
}

#[derive(Args, Clone, Copy)]
struct VariantArgs {
    /// Use the mini manifest / description
    #[arg(long)]
    mini: bool,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    variant: VariantArgs,

    /// Number of pairs to download (default: all)
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value = "data")]
    out: Utf8PathBuf,
}

impl VariantArgs {
    fn variant(self) -> Variant {
        if self.mini { Variant::Mini } else { Variant::Full }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<LabcasError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &LabcasError) -> u8 {
    match error {
        LabcasError::Authentication(_)
        | LabcasError::MissingCredentials(_)
        | LabcasError::ConfigRead(_)
        | LabcasError::ConfigParse(_)
        | LabcasError::InvalidConfig(_) => 2,
        LabcasError::TransientNetwork(_)
        | LabcasError::NotFound(_)
        | LabcasError::Server { .. }
        | LabcasError::HttpStatus { .. }
        | LabcasError::Decode(_)
        | LabcasError::CollectionNotFound(_) => 3,
        LabcasError::SchemaValidation(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };

    match cli.command {
        Commands::Harvest => {
            let credentials = Credentials::from_env()?;
            let app = online_app(config)?;
            let report = app.harvest(&credentials, sink)?;
            emit(output_mode, &report, HumanOutput::harvest)?;
            if !report.is_complete() {
                // Partial harvests still wrote every snapshot.
                tracing::warn!(failed = report.failures.len(), "harvest finished with failures");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Manifest => {
            let app = App::new(config, NopCatalog);
            let result = app.build_manifest(sink)?;
            emit(output_mode, &result, HumanOutput::manifest)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Describe(args) => {
            let app = App::new(config, NopCatalog);
            let result = app.describe(args.variant(), sink)?;
            emit(output_mode, &result, HumanOutput::describe)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect(args) => {
            let app = App::new(config, NopCatalog);
            let result = app.inspect(args.variant(), sink)?;
            emit(output_mode, &result, HumanOutput::inspect)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fetch(args) => {
            let credentials = Credentials::from_env()?;
            let app = online_app(config)?;
            let report = app.fetch(
                &credentials,
                args.variant.variant(),
                args.limit,
                &args.out,
                sink,
            )?;
            emit(output_mode, &report, HumanOutput::fetch)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn online_app(config: ResolvedConfig) -> Result<App<LabcasHttpClient>, LabcasError> {
    let client = LabcasHttpClient::new(config.catalog.clone())?;
    Ok(App::new(config, client))
}

fn emit<T: serde::Serialize>(
    mode: OutputMode,
    value: &T,
    human: fn(&T),
) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Human => {
            human(value);
            Ok(())
        }
    }
}

/// Stands in for the catalog in stages that never touch the network.
struct NopCatalog;

impl CatalogClient for NopCatalog {
    fn authenticate(&self, _credentials: &Credentials) -> Result<(), LabcasError> {
        Err(LabcasError::Authentication(
            "catalog client not configured".to_string(),
        ))
    }

    fn fetch(&self, path: &str, _params: &[(&str, String)]) -> Result<Value, LabcasError> {
        Err(LabcasError::NotFound(format!(
            "catalog client not configured: {path}"
        )))
    }

    fn download(&self, url: &str, _destination: &Path) -> Result<u64, LabcasError> {
        Err(LabcasError::NotFound(format!(
            "catalog client not configured: {url}"
        )))
    }

    fn resource_url(&self, file_id: &str) -> String {
        file_id.to_string()
    }
}
