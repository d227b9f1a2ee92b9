//! # Iliad Bridge CLI (`iliad-bridge`)
//!
//! Operator interface for the intranet bridge: database setup, one-off or
//! scheduled auto-upload passes, the HTTP API, and credential tooling.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `iliad-bridge init` | Create the SQLite database and media directories |
//! | `iliad-bridge serve` | Start the HTTP API (optionally with the scheduler) |
//! | `iliad-bridge upload run` | Run one auto-upload pass and print the report |
//! | `iliad-bridge upload watch` | Run the scheduler in the foreground |
//! | `iliad-bridge status` | Show recent upload records |
//! | `iliad-bridge sources` | List vendor sources |
//! | `iliad-bridge keys generate` | Print a fresh Fernet key |
//! | `iliad-bridge keys encrypt <api-key>` | Encrypt an API key with `ILIAD_ENCRYPTION_KEY` |
//!
//! ## Examples
//!
//! ```bash
//! iliad-bridge init --config ./config/bridge.toml
//! iliad-bridge upload run --config ./config/bridge.toml
//! iliad-bridge serve --scheduler --config ./config/bridge.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use iliad_bridge::config::{self, Config};
use iliad_bridge::credentials;
use iliad_bridge::iliad::IliadClient;
use iliad_bridge::pipeline::{BatchReport, PollPolicy, UploadPipeline};
use iliad_bridge::scheduler::Scheduler;
use iliad_bridge::{db, ledger, migrate, server, sources};

/// Iliad Bridge: auto-upload pipeline and intranet API for the Iliad
/// document/RAG service.
#[derive(Parser)]
#[command(name = "iliad-bridge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and media directories.
    ///
    /// Idempotent: running it again leaves existing data untouched.
    Init,

    /// Start the HTTP API.
    Serve {
        /// Also start the background auto-upload scheduler.
        #[arg(long)]
        scheduler: bool,
    },

    /// Drive the auto-upload pipeline.
    Upload {
        #[command(subcommand)]
        action: UploadAction,
    },

    /// Show recent upload records.
    Status {
        /// Maximum number of rows.
        #[arg(long)]
        limit: Option<i64>,

        /// Only the newest record for each file.
        #[arg(long)]
        latest: bool,
    },

    /// List vendor sources.
    Sources,

    /// Fernet key tooling for the encrypted API key.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum UploadAction {
    /// Run a single pass over the drop directory.
    Run,
    /// Run the scheduler in the foreground until ctrl-c.
    Watch,
}

#[derive(Subcommand)]
enum KeysAction {
    /// Print a new random Fernet key.
    Generate,
    /// Encrypt an API key with the key in `ILIAD_ENCRYPTION_KEY`.
    Encrypt {
        /// Plaintext vendor API key.
        api_key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Key tooling needs no config file
    let command = match cli.command {
        Commands::Keys { action } => return run_keys(&action),
        other => other,
    };

    let cfg = config::load_config(&cli.config)?;

    match command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            for dir in [
                cfg.media.auto_upload_dir(),
                cfg.media.manual_check_dir(),
                cfg.media.previews_dir(),
            ] {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            println!("Database initialized successfully.");
        }
        Commands::Serve { scheduler } => {
            server::run_server(&cfg, scheduler).await?;
        }
        Commands::Upload { action } => {
            let pipeline = build_pipeline(&cfg).await?;
            match action {
                UploadAction::Run => {
                    let report = pipeline
                        .run_batch(PollPolicy::scheduled(&cfg.auto_upload))
                        .await;
                    print_report(&report);
                }
                UploadAction::Watch => {
                    let scheduler = Scheduler::from_config(pipeline, &cfg.auto_upload);
                    println!(
                        "Watching {} every {}s (ctrl-c to stop)",
                        cfg.media.auto_upload_dir().display(),
                        cfg.auto_upload.interval_secs
                    );
                    scheduler.run_until_ctrl_c().await?;
                }
            }
        }
        Commands::Status { limit, latest } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            let limit = limit.unwrap_or(cfg.auto_upload.history_limit);
            let records = if latest {
                ledger::latest_per_file(&pool, limit).await?
            } else {
                ledger::latest(&pool, limit).await?
            };
            pool.close().await;

            if records.is_empty() {
                println!("No upload records.");
                return Ok(());
            }
            println!(
                "{:<20} {:<24} {:<40} {:<16} TASK",
                "TIMESTAMP", "STATUS", "FILE", "SOURCE"
            );
            for r in records {
                println!(
                    "{:<20} {:<24} {:<40} {:<16} {}",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.status,
                    r.file_name,
                    r.source,
                    r.task_id.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Keys { action } => run_keys(&action)?,
    }

    Ok(())
}

async fn build_pipeline(cfg: &Config) -> anyhow::Result<UploadPipeline> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    let client = Arc::new(IliadClient::new(cfg)?);
    UploadPipeline::from_config(cfg, client, pool)
}

fn run_keys(action: &KeysAction) -> anyhow::Result<()> {
    match action {
        KeysAction::Generate => println!("{}", credentials::generate_key()),
        KeysAction::Encrypt { api_key } => {
            let key = std::env::var("ILIAD_ENCRYPTION_KEY")
                .context("ILIAD_ENCRYPTION_KEY must be set")?;
            println!("{}", credentials::encrypt_api_key(&key, api_key)?);
        }
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!("Processed: {}", report.processed_files.len());
    for p in &report.processed_files {
        println!(
            "  {} {} {}",
            p.status,
            p.file_name,
            p.preview_url.as_deref().unwrap_or("")
        );
    }
    println!("Unprocessed: {}", report.unprocessed_files.len());
    for u in &report.unprocessed_files {
        println!("  {} ({})", u.file_name, u.reason);
    }
}
