//! jxa-bridge CLI: validate and run JavaScript for Automation scripts and
//! call the built-in application tools.
//!
//! Results go to stdout as JSON; logs go to stderr and a rolling JSON file.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// jxa-bridge: generate, check, and run JXA scripts against macOS applications
#[derive(Parser, Debug)]
#[command(name = "jxa-bridge", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (for `.jxa-bridge/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Target application name, overriding configuration
    #[arg(short, long)]
    app: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Statically validate a script file
    Validate {
        /// Script file to check
        file: PathBuf,
        /// Run only the fast error-level checks
        #[arg(long)]
        quick: bool,
    },
    /// Execute a script file and print its JSON result
    Run {
        /// Script file to execute
        file: PathBuf,
        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Retries for transient failures
        #[arg(long)]
        retries: Option<u32>,
        /// Keep the temporary script file and log its path
        #[arg(long)]
        debug: bool,
        /// Skip pre-flight validation
        #[arg(long)]
        no_validate: bool,
    },
    /// List the available tools
    Tools,
    /// Invoke a tool with JSON arguments
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object (default: {})
        args: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default `.jxa-bridge/config.toml` into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer on stderr; stdout carries results only.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "jxa-bridge", "jxa-bridge")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "jxa-bridge.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if !jxa_core::config_exists(Some(&workspace)) {
        tracing::debug!("No configuration file found, using defaults and environment");
    }
    let mut config = jxa_core::config::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(app) = cli.app {
        config.application.name = app;
    }
    for problem in config.validate() {
        tracing::warn!(problem = %problem, "Configuration problem");
    }

    let report = commands::handle_command(cli.command, &workspace, config).await?;
    println!("{}", report.output);
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
