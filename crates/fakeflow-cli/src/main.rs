mod logging;
mod sinks;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use fakeflow_generate::{CompiledSchema, GenerateOptions, GenerationEngine, GenerationError};
use fakeflow_schema::{
    Config, SchemaError, ValidationIssue, config_json_schema, load_config_value,
    validate_config_document,
};
use logging::{LogFormat, init_logging};
use sinks::{open_sinks, write_bytes_atomic};
use thiserror::Error;

/// Records generated by `check` to exercise a config end to end.
const CHECK_RECORDS: u64 = 5;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Schema(#[from] SchemaError),
    #[error("config is invalid: {0} error(s)")]
    Invalid(usize),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("output '{}' already exists; pass --force to overwrite", .0.display())]
    OutputExists(PathBuf),
    #[error("invalid path '{}'", .0.display())]
    InvalidPath(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging error: {0}")]
    Logging(String),
}

#[derive(Parser, Debug)]
#[command(name = "fakeflow", version, about = "Schema-driven synthetic data generator")]
struct Cli {
    /// Log line encoding.
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Append logs to this file instead of stderr.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate every entity of a config into its output file.
    Generate(GenerateArgs),
    /// Validate a config and dry-run a few records.
    Check(CheckArgs),
    /// Print the JSON Schema of the config format.
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, short)]
    config: PathBuf,
    /// Overwrite existing output files.
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Seed for the random source; overrides the config seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Worker threads; defaults to twice the available parallelism.
    #[arg(long)]
    workers: Option<usize>,
    /// Write the run report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Output path; stdout when unset.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.log_format, cli.log_file.as_deref()) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Check(args) => run_check(args),
        Command::Schema(args) => run_schema(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(event = "run_failed", error = %err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    let timer = Instant::now();
    let config = load_config(&args.config)?;
    let schema = CompiledSchema::compile(&config)?;
    let mut sinks = open_sinks(&schema, args.force)?;

    let engine = GenerationEngine::new(GenerateOptions {
        workers: args.workers,
        seed: args.seed,
        ..GenerateOptions::default()
    });
    let report = engine.run(&schema, &mut sinks)?;
    drop(sinks);

    if let Some(path) = &args.report {
        write_bytes_atomic(path, &serde_json::to_vec_pretty(&report)?)?;
        tracing::info!(event = "report_written", path = %path.display());
    }

    let elapsed = timer.elapsed();
    tracing::info!(
        event = "run_finished",
        status = "success",
        run_id = %report.run_id,
        duration_ms = elapsed.as_millis() as u64
    );
    println!(
        "generated {} records across {} entities in {:.2?}",
        report.records_written(),
        report.entities.len(),
        elapsed
    );
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<(), CliError> {
    let config = load_config(&args.config)?;
    let schema = CompiledSchema::compile(&config)?;
    let mut sinks: Vec<io::Sink> = schema.entities().iter().map(|_| io::sink()).collect();

    let engine = GenerationEngine::new(GenerateOptions {
        total_count: Some(CHECK_RECORDS.min(schema.total_count())),
        ..GenerateOptions::default()
    });
    let report = engine.run(&schema, &mut sinks)?;

    let diagnostics = report.diagnostics_total();
    println!(
        "config ok: {} entities, {} diagnostics in a {}-record dry run",
        report.entities.len(),
        diagnostics,
        report.total_count
    );
    for (code, count) in &report.diagnostics_by_code {
        println!("  {code}: {count}");
    }
    Ok(())
}

fn run_schema(args: SchemaArgs) -> Result<(), CliError> {
    let schema = config_json_schema();
    let mut encoded = serde_json::to_vec_pretty(&schema)?;
    encoded.push(b'\n');
    match args.out {
        Some(path) => {
            write_bytes_atomic(&path, &encoded)?;
            tracing::info!(event = "schema_written", path = %path.display());
        }
        None => io::Write::write_all(&mut io::stdout().lock(), &encoded)?,
    }
    Ok(())
}

/// Load, validate and parse a config file. Warnings are logged; any error
/// rejects the config.
fn load_config(path: &Path) -> Result<Config, CliError> {
    let value = load_config_value(path)?;
    match validate_config_document(&value) {
        Ok(validated) => {
            for issue in &validated.warnings {
                log_issue(issue, false);
            }
            tracing::info!(
                event = "config_loaded",
                path = %path.display(),
                entities = validated.config.entities.len(),
                warnings = validated.warnings.len()
            );
            Ok(validated.config)
        }
        Err(report) => {
            for issue in report.errors.iter() {
                log_issue(issue, true);
            }
            for issue in report.warnings.iter() {
                log_issue(issue, false);
            }
            Err(CliError::Invalid(report.errors.len()))
        }
    }
}

fn log_issue(issue: &ValidationIssue, error: bool) {
    let hint = issue.hint.as_deref().unwrap_or("");
    if error {
        tracing::error!(code = %issue.code, path = %issue.path, hint, "{}", issue.message);
    } else {
        tracing::warn!(code = %issue.code, path = %issue.path, hint, "{}", issue.message);
    }
}
