#![forbid(unsafe_code)]

mod cmd;
mod output;

use anyhow::{Context, Result};
use aprs_history_core::config::{DEFAULT_CONFIG_FILE, LoggingConfig, Settings, load_settings};
use aprs_history_core::error::ErrorCode;
use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "aprs-history: filtered, bounded APRS position history",
    long_about = None
)]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output format (pretty, text, json).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags and environment.
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Ingest decoded position reports",
        long_about = "Read newline-delimited JSON position reports and keep the accepted ones in history.",
        after_help = "EXAMPLES:\n    # Ingest a capture file\n    aprs-history ingest reports.ndjson\n\n    # Stream from a decoder\n    aprs-decoder | aprs-history ingest\n\n    # Four station-partitioned workers\n    aprs-history ingest --workers 4 reports.ndjson"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        about = "Trim history to the retention depth",
        long_about = "Delete every station's rows beyond the newest `history.keep`, ignoring the rate limit.",
        after_help = "EXAMPLES:\n    # Trim now\n    aprs-history trim\n\n    # Emit machine-readable output\n    aprs-history trim --json"
    )]
    Trim(cmd::trim::TrimArgs),

    #[command(
        about = "Dry-run the filters",
        long_about = "Show which reports the stateless filters would accept, without touching history.",
        after_help = "EXAMPLES:\n    # Check a capture file\n    aprs-history check reports.ndjson\n\n    # Only show what would be dropped\n    aprs-history check --rejected-only reports.ndjson"
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        about = "Show the effective configuration",
        after_help = "EXAMPLES:\n    # Print defaults merged with configuration.yaml\n    aprs-history config\n\n    # Write a starting configuration file\n    aprs-history config > configuration.yaml"
    )]
    Config(cmd::config::ConfigArgs),
}

/// Install the global subscriber.
///
/// `APRS_HISTORY_LOG` overrides `logging.level` and `APRS_HISTORY_LOG_FORMAT`
/// overrides `logging.format`. Events go to stderr, plus
/// `<logging.directory>/<level>.log` when a directory is configured; the
/// returned guard flushes that file on drop.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_env("APRS_HISTORY_LOG") {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("invalid logging.level {:?}", logging.level))?,
    };

    let format = env::var("APRS_HISTORY_LOG_FORMAT").unwrap_or_else(|_| logging.format.clone());

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let (writer, guard) = tracing_appender::non_blocking(log_file(directory, &logging.level)?);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(guard)
}

fn log_file(directory: &Path, level: &str) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("create log directory {}", directory.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(level.to_ascii_lowercase())
        .filename_suffix("log")
        .build(directory)
        .with_context(|| format!("open log file in {}", directory.display()))
}

fn load_config(path: &Path, output: OutputMode) -> Result<Settings> {
    load_settings(path).inspect_err(|error| {
        // Logging is not up yet; report straight to the terminal.
        let _ = render_error(output, &CliError::from_code(ErrorCode::ConfigParseError, error));
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = cli.output_mode();

    let settings = load_config(&cli.config, output)?;
    let _guard = init_tracing(&settings.logging)?;

    match cli.command {
        Commands::Ingest(ref args) => cmd::ingest::run_ingest(args, &settings, output, cli.quiet),
        Commands::Trim(ref args) => cmd::trim::run_trim(args, &settings, output, cli.quiet),
        Commands::Check(ref args) => cmd::check::run_check(args, &settings, output),
        Commands::Config(ref args) => cmd::config::run_config(args, &cli.config, &settings, output),
    }
}
