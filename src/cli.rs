//! CLI driver. The embedding product declares its plans and hands them to
//! [`run`] from its own `main`:
//!
//! ```no_run
//! use relup::plan::Registry;
//!
//! fn registry() -> Registry {
//!     // Release order + version plans, declared in code.
//! #   Registry::new(relup::plan::ReleaseOrder::new(["1.0.0"]).unwrap())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<std::process::ExitCode> {
//!     relup::cli::run(registry()).await
//! }
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use itertools::Itertools;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::adapters::{
    DiskFileSystem, PgSchemaExecutor, PgSeedWriter, StepContext, YamlConfigMerger,
};
use crate::config::{self, DatabaseArgs};
use crate::engine::{MigrationEngine, PlanState, StatusReport};
use crate::ledger::PgLedger;
use crate::plan::Registry;
use crate::progress::PlanReporter;

#[derive(Parser)]
#[command(name = "relup", author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = "relup.yaml", global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending version plans up to a target version
    Up {
        /// Target version (default: latest known release)
        #[arg(long)]
        to: Option<String>,

        /// List pending steps without applying anything
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        database_args: DatabaseArgs,
    },

    /// Roll back the single most recently applied version plan
    Down {
        /// The immediately preceding version to roll back to
        #[arg(long)]
        to: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        database_args: DatabaseArgs,
    },

    /// Show the applied version and any partially-applied plan
    Status {
        /// Output format: human (default), json
        #[arg(long, default_value = "human")]
        format: String,

        #[command(flatten)]
        database_args: DatabaseArgs,
    },
}

pub async fn run(registry: Registry) -> Result<ExitCode> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    let file_config = config::load_config(&cli.config_file)?;
    let database_args = match &cli.command {
        Commands::Up { database_args, .. }
        | Commands::Down { database_args, .. }
        | Commands::Status { database_args, .. } => database_args.clone(),
    };

    let resolved = config::ConfigBuilder::new()
        .with_file(file_config)
        .with_env(config::env_input())
        .with_cli_args(database_args.into())
        .resolve()?;

    let pool = PgPool::connect(&resolved.database_url).await?;
    let ledger = PgLedger::new(pool.clone(), resolved.ledger_table.clone());
    ledger.ensure_tables().await?;

    let ctx = StepContext::new(
        resolved.environment.clone(),
        Arc::new(PgSchemaExecutor::new(pool.clone())),
        Arc::new(PgSeedWriter::new(pool.clone(), resolved.seed_tables.clone())),
        Arc::new(YamlConfigMerger::new()),
        Arc::new(DiskFileSystem::new()),
    );

    let engine = MigrationEngine::new(registry, Arc::new(ledger), ctx)
        .with_reporter(PlanReporter::new(cli.verbose));

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Received shutdown signal, stopping at the next step boundary");
        cancel.cancel();
    });

    match &cli.command {
        Commands::Up { to, dry_run, .. } => {
            if *dry_run {
                let pending = engine.preview(to.as_deref()).await?;
                print_preview(&resolved.environment, &pending);
                return Ok(ExitCode::SUCCESS);
            }

            info!("Applying pending version plans");
            let report = engine.up(to.as_deref()).await?;
            PlanReporter::new(cli.verbose).summary(&report);
            Ok(ExitCode::from(report.outcome().exit_code()))
        }
        Commands::Down { to, force, .. } => {
            let current = engine.current_version(&resolved.environment).await?;
            let Some(current) = current else {
                println!("Nothing has been applied to '{}'", resolved.environment);
                return Ok(ExitCode::SUCCESS);
            };

            if !confirm_rollback(&current, to, *force)? {
                println!("Aborted.");
                return Ok(ExitCode::SUCCESS);
            }

            info!("Rolling back {current} to {to}");
            let report = engine.down(to).await?;
            PlanReporter::new(cli.verbose).rollback_summary(&report);
            Ok(ExitCode::from(report.exit_code()))
        }
        Commands::Status { format, .. } => {
            let status = engine.status().await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&status)?),
                _ => print_status(&status),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn confirm_rollback(current: &str, to: &str, force: bool) -> Result<bool> {
    if force {
        return Ok(true);
    }

    use std::io::IsTerminal;
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "Refusing to roll back without confirmation in a non-interactive session.\n\
             Re-run with --force to roll back {current} to {to}."
        );
    }

    Ok(dialoguer::Confirm::new()
        .with_prompt(format!(
            "Roll back version {current} to {to}? This reverts its steps in reverse order"
        ))
        .default(false)
        .interact()?)
}

fn print_preview(environment: &str, pending: &[(String, Vec<String>)]) {
    if pending.is_empty() {
        println!("Environment '{environment}' is up to date - nothing to apply");
        return;
    }
    println!("Pending steps for '{environment}':");
    for (version, steps) in pending {
        println!("  {version}: {}", steps.iter().join(", "));
    }
}

fn print_status(status: &StatusReport) {
    println!("Environment: {}", status.environment);
    println!(
        "Current version: {}",
        status.current_version.as_deref().unwrap_or("(none)")
    );
    for plan in &status.plans {
        let line = match plan.state {
            PlanState::Applied => format!("applied ({} steps)", plan.total_steps),
            PlanState::Partial => format!(
                "PARTIAL ({}/{} steps completed)",
                plan.completed_steps, plan.total_steps
            ),
            PlanState::Pending => format!("pending ({} steps)", plan.total_steps),
            PlanState::Empty => "no steps".to_string(),
        };
        println!("  {:<12} {}", plan.version, line);
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn" // default level
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt().with_env_filter(filter).with_target(false).init();
}
