//! Lumin daemon.
//!
//! Receives GitHub push webhooks and turns each push into a fresh file tree
//! for the linked static-site project.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lumin_common::{ErrorCode, LogConfig, NewProject, init_logging};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use lumind::config::ServerConfig;
use lumind::github::GitHubClient;
use lumind::history::IngestionHistory;
use lumind::http_api::{self, HttpState};
use lumind::metrics;
use lumind::signature::SignatureVerifier;
use lumind::store::{FsBlobStore, SqliteStore};
use lumind::{IngestionPipeline, PipelineParts};

#[derive(Parser)]
#[command(name = "lumind")]
#[command(author, version, about = "Lumin daemon - GitHub push ingestion for static sites")]
struct Cli {
    /// Path to the configuration file (TOML)
    #[arg(short, long, global = true, env = "LUMIN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Create a project linked to a GitHub repository
    Link(LinkArgs),
}

#[derive(Args)]
struct LinkArgs {
    /// Repository owner (user or organization)
    #[arg(long)]
    owner: String,

    /// Repository name
    #[arg(long)]
    repo: String,

    /// Project name (defaults to the repository name)
    #[arg(long)]
    name: Option<String>,

    /// Owning user id
    #[arg(long, default_value = "1")]
    user_id: i64,

    /// Subdomain the site is served from
    #[arg(long)]
    domain: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let (mut log_config, log_warnings) = LogConfig::from_env(default_level);
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _log_guards = init_logging(&log_config).context("failed to initialize logging")?;
    for warning in log_warnings {
        warn!("{}", warning);
    }

    let (config, source) =
        ServerConfig::load(cli.config.as_deref()).map_err(|e| startup_error(e.code(), e))?;
    match &source {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file found, using defaults"),
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Link(args) => link(&config, args),
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting Lumin daemon...");
    metrics::register_metrics().map_err(|e| startup_error(ErrorCode::InternalMetricsError, e))?;

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open database {:?}", config.database_path))?;
    let blobs = FsBlobStore::new(&config.blob_dir);
    info!("Blob storage at {:?}", blobs.root());

    let app = config
        .github
        .credentials()
        .map_err(|e| startup_error(e.code(), e))?;
    match &app {
        Some(app) => info!("GitHub App {} configured", app.app_id()),
        None => warn!("No GitHub App configured; archive fetches will fail"),
    }
    if config.github.webhook_secret.is_none() {
        warn!("No webhook secret configured; every delivery will be rejected");
    }
    let client = GitHubClient::new(config.client_config(), app)
        .context("failed to build GitHub client")?;

    let history = match &config.history_file {
        Some(path) => match IngestionHistory::open(path, config.history_capacity) {
            Ok(history) => {
                info!("Ingestion history at {:?} ({} entries)", path, history.len());
                history
            }
            Err(e) => {
                warn!("Failed to load history from {:?}: {}", path, e);
                IngestionHistory::new(config.history_capacity).with_persistence(path.clone())
            }
        },
        None => {
            info!("Ingestion history in-memory only (no persistence)");
            IngestionHistory::new(config.history_capacity)
        }
    };

    let pipeline = IngestionPipeline::new(PipelineParts {
        verifier: SignatureVerifier::new(config.github.webhook_secret.clone()),
        host: Arc::new(client),
        projects: Arc::new(store.clone()),
        tree: Arc::new(store),
        blobs: Arc::new(blobs),
        check_name: config.github.check_name.clone(),
        ingest: config.ingest.clone(),
    })
    .with_history(Arc::new(history));

    let state = HttpState::new(Arc::new(pipeline));
    http_api::serve(config.listen_addr, state, shutdown_signal())
        .await
        .with_context(|| format!("server on {} failed", config.listen_addr))?;
    info!("Lumin daemon stopped");
    Ok(())
}

fn link(config: &ServerConfig, args: LinkArgs) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open database {:?}", config.database_path))?;
    let project = store
        .create_project(&NewProject {
            name: args.name.unwrap_or_else(|| args.repo.clone()),
            description: String::new(),
            user_id: args.user_id,
            domain: args.domain,
            github_owner: Some(args.owner),
            github_repo: Some(args.repo),
        })
        .context("failed to create project (is the repository already linked?)")?;
    println!("{}", serde_json::to_string_pretty(&project)?);
    Ok(())
}

/// Catalog entry with remediation steps, followed by the underlying cause.
fn startup_error(code: ErrorCode, cause: impl std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("{}Cause: {}", code.entry().format_full(), cause)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
