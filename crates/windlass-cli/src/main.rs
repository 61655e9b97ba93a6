// Windlass CLI
//
// Design Decision: use clap derive for argument parsing with env fallbacks.
// Design Decision: exit 0 on success, 1 on validation/user error, 2 on
// internal failure, so scripts can tell a bad document from a broken agent.

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "windlass")]
#[command(about = "Windlass - event-driven workflow automation agent")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse one document and execute its trigger until interrupted
    Run {
        /// Workflow document
        file: PathBuf,

        /// Print the execution plan without starting the trigger
        #[arg(long)]
        dry_run: bool,

        /// History store location
        #[arg(long, env = "WINDLASS_DB", default_value = "windlass.db")]
        db: PathBuf,
    },

    /// Scan, schedule and supervise all workflows in a directory
    Agent {
        /// Workflow directory
        #[arg(default_value = "./workflows")]
        dir: PathBuf,

        /// Hot-reload the directory on document changes
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        watch: bool,

        /// Per-workflow execution log destination; empty means the shared sink
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// HTTP surface port
        #[arg(long, env = "WINDLASS_HTTP_PORT", default_value_t = 8080)]
        http_port: u16,

        /// Validate and print the plan without starting anything
        #[arg(long)]
        dry_run: bool,

        /// History store location
        #[arg(long, env = "WINDLASS_DB", default_value = "windlass.db")]
        db: PathBuf,
    },

    /// Parse documents without executing them
    Validate {
        /// File path or glob (e.g. "workflows/*.yaml")
        pattern: String,

        /// Promote warnings to failures
        #[arg(long)]
        strict: bool,
    },

    /// List recent executions from the history store
    History {
        #[arg(long)]
        workflow: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, env = "WINDLASS_DB", default_value = "windlass.db")]
        db: PathBuf,
    },

    /// Aggregate statistics for one workflow
    Stats {
        name: String,

        #[arg(long, default_value_t = 7)]
        days: i64,

        #[arg(long, env = "WINDLASS_DB", default_value = "windlass.db")]
        db: PathBuf,
    },

    /// Recent failed executions
    Failures {
        #[arg(long, default_value_t = 24)]
        hours: i64,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, env = "WINDLASS_DB", default_value = "windlass.db")]
        db: PathBuf,
    },
}

/// Splits user mistakes (exit 1) from engine failures (exit 2).
#[derive(Debug)]
pub enum CliError {
    Usage(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "windlass=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let format = output::OutputFormat::from_str(&cli.output);

    let result = match cli.command {
        Commands::Run { file, dry_run, db } => commands::run::run(&file, dry_run, &db, format).await,
        Commands::Agent {
            dir,
            watch,
            log_dir,
            http_port,
            dry_run,
            db,
        } => commands::agent::run(&dir, watch, log_dir, http_port, dry_run, &db, format).await,
        Commands::Validate { pattern, strict } => {
            commands::validate::run(&pattern, strict, format)
        }
        Commands::History { workflow, limit, db } => {
            commands::queries::history(workflow.as_deref(), limit, &db, format).await
        }
        Commands::Stats { name, days, db } => {
            commands::queries::stats(&name, days, &db, format).await
        }
        Commands::Failures { hours, limit, db } => {
            commands::queries::failures(hours, limit, &db, format).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
        Err(CliError::Internal(e)) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
