//! labtrace CLI - collects experiment traces from an MQTT broker.

use anyhow::Result;
use clap::{Parser, Subcommand};
use labtrace_core::config::LogFormat;
use labtrace_core::{Config, RecordFormat};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Broker error (connect, subscribe, connection lost)
    TransportError = 2,
    /// Output file error (open, write)
    SinkError = 4,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the library error kind.
    fn from_error(error: &anyhow::Error) -> Self {
        use labtrace_core::Error;

        match error.downcast_ref::<Error>() {
            Some(Error::Config(_)) => ExitCode::ConfigError,
            Some(Error::Transport(_)) => ExitCode::TransportError,
            Some(Error::Sink(_)) => ExitCode::SinkError,
            Some(_) => ExitCode::RuntimeError,
            None => {
                let error_str = error.to_string().to_lowercase();
                if error_str.contains("config")
                    || error_str.contains("toml")
                    || error_str.contains("parse")
                {
                    ExitCode::ConfigError
                } else {
                    ExitCode::RuntimeError
                }
            }
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "labtrace")]
#[command(about = "Timestamp-ordered experiment trace collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect one experiment's output until interrupted
    Collect {
        /// Override broker address
        #[arg(long)]
        broker: Option<String>,

        /// Override broker port
        #[arg(long)]
        port: Option<u16>,

        /// Override experiment identifier
        #[arg(long)]
        experiment: Option<String>,

        /// Override record type (structured, raw-capture; aliases json, pcap)
        #[arg(long)]
        record_type: Option<RecordFormat>,

        /// Override retention window in milliseconds
        #[arg(long)]
        retention_ms: Option<u64>,

        /// Override output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses; errors in
    // it are reported properly once logging is up.
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_filter()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Collect {
            broker,
            port,
            experiment,
            record_type,
            retention_ms,
            output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let overrides = commands::collect::CollectOverrides {
                broker,
                port,
                experiment,
                record_type,
                retention_ms,
                output,
            };
            commands::collect::run(config, overrides).await?;
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Load the configuration without validating it; CLI overrides still apply.
///
/// Without `--config`, `labtrace.toml` in the working directory is used when
/// present, otherwise the defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from("labtrace.toml");
            if !fallback.exists() {
                return Ok(Config::default());
            }
            fallback
        }
    };

    let content = std::fs::read_to_string(&path).map_err(|e| {
        labtrace_core::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    let config: Config = toml::from_str(&content).map_err(labtrace_core::Error::from)?;
    Ok(config)
}
