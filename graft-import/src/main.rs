//! graft-import - domain extract import service
//!
//! `serve` hosts the HTTP API for fire-and-forget dispatch and status polling.
//! `run` executes a single import in the foreground and exits non-zero if it
//! does not complete.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use graft_common::{EventBus, ImportSettings};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use graft_import::config::CatalogResolver;
use graft_import::graph::{GraphBackend, MemoryGraph, Neo4jBackend};
use graft_import::models::ImportRequest;
use graft_import::{AppState, ImportPipeline, RunOptions, WorkflowStore};

/// Command-line arguments for graft-import
#[derive(Parser, Debug)]
#[command(name = "graft-import")]
#[command(about = "Fetch, reshape and graph-load domain extracts")]
#[command(version)]
struct Cli {
    /// Settings file (overrides GRAFT_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Domain catalog file (overrides the settings entry)
    #[arg(long, global = true, env = "GRAFT_CATALOG")]
    catalog: Option<PathBuf>,

    /// Load into an in-process graph instead of the configured database
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host the HTTP API
    Serve {
        /// Listen address (overrides the settings file)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Run one import in the foreground
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    domain_type: String,
    #[arg(long)]
    domain_name: String,
    /// `YYYY-MM-DD` or `YYYYMMDD`
    #[arg(long)]
    cob_date: String,
    #[arg(long)]
    skip_fetch: bool,
    #[arg(long)]
    skip_cut: bool,
    #[arg(long)]
    skip_split: bool,
    #[arg(long)]
    skip_load: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = ImportSettings::load(cli.config.as_deref()).context("Failed to load settings")?;

    // RUST_LOG wins over the settings file
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let catalog_path = cli
        .catalog
        .clone()
        .or_else(|| settings.catalog.clone())
        .context("No domain catalog configured (set `catalog` in settings or pass --catalog)")?;
    let resolver = CatalogResolver::from_file(&catalog_path)
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;

    let graph: Arc<dyn GraphBackend> = if cli.dry_run {
        info!("Dry run: loading into an in-process graph");
        Arc::new(MemoryGraph::new())
    } else {
        Arc::new(Neo4jBackend::new(settings.graph.clone()))
    };
    let backend_name = graph.name();

    let settings = Arc::new(settings);
    let pipeline = Arc::new(ImportPipeline::new(
        Arc::new(resolver),
        Arc::clone(&settings),
        WorkflowStore::new(),
        graph,
        EventBus::new(100),
    ));

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            serve(pipeline, backend_name, &bind).await
        }
        Command::Run(args) => run_once(pipeline, args).await,
    }
}

async fn serve(pipeline: Arc<ImportPipeline>, backend_name: &'static str, bind: &str) -> Result<()> {
    let app = graft_import::build_router(AppState::new(pipeline, backend_name));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_once(pipeline: Arc<ImportPipeline>, args: RunArgs) -> Result<()> {
    let cob_date = ImportRequest::parse_cob_date(&args.cob_date)?;
    let request = ImportRequest::new(args.domain_type, args.domain_name, cob_date);
    let options = RunOptions {
        skip_fetch: args.skip_fetch,
        skip_cut: args.skip_cut,
        skip_split: args.skip_split,
        skip_load: args.skip_load,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let workflow_id = Uuid::new_v4();
    let state = pipeline
        .run(&request, workflow_id, options, cancel)
        .await
        .with_context(|| format!("Import {} did not complete", workflow_id))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
