//! # quill
//!
//! Quill transcription service binary. Loads settings, prepares the local
//! model store, and then either serves the HTTP API, runs a one-shot
//! bootstrap, or hands the process over to the inference backend.

#![deny(unsafe_code)]

mod launcher;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quill_gateway::{HttpGateway, InferenceGateway};
use quill_server::{DEFAULT_DRAIN_TIMEOUT, QuillServer, shutdown_signal};
use quill_settings::{Settings, load_settings};
use quill_store::{HubFetcher, ensure_ready, resolve_repo_dir};

use crate::logging::LogFormat;

/// Quill transcription service.
#[derive(Parser, Debug)]
#[command(name = "quill", about = "Image-to-Markdown transcription service")]
struct Cli {
    /// JSON config file layered between defaults and `OCR_*` variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Prepare the model store, check the backend, and serve the HTTP API (default).
    Serve,
    /// Fetch model artifacts into the local store and exit.
    Bootstrap {
        /// Re-fetch even when artifacts already exist.
        #[arg(long)]
        force: bool,
    },
    /// Prepare the model store and exec the inference backend on it.
    LaunchBackend,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    logging::init(settings.effective_log_level(), cli.log_format)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Bootstrap { force } => bootstrap(bootstrap_settings(settings, force)).await,
        Command::LaunchBackend => launch_backend(settings).await,
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let store_root = ensure_ready(&settings, Arc::new(HubFetcher::default()))
        .await
        .context("Model store bootstrap failed")?;
    tracing::info!(
        model_name = %settings.model_name,
        model_repo_id = %settings.model_repo_id,
        model_store_dir = ?store_root,
        "model store ready"
    );

    let gateway = HttpGateway::new(&settings).context("Failed to build inference client")?;
    gateway
        .startup_check(settings.startup_compat_check)
        .await
        .context(
            "Backend startup check failed. Ensure the inference backend is running and \
             model artifacts are available in OCR_MODEL_STORE_DIR",
        )?;
    tracing::info!(
        backend_base_url = %settings.backend_base_url,
        backend_model_id = %settings.backend_model_id,
        "inference backend reachable"
    );

    let metrics =
        quill_server::metrics::install_recorder().context("Failed to install metrics recorder")?;
    let settings = Arc::new(settings);
    let server = QuillServer::new(settings, Arc::new(gateway)).with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Quill listening on http://{addr}");

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    let drained = server.shutdown().drain(handle, DEFAULT_DRAIN_TIMEOUT).await;
    if !drained {
        tracing::warn!(
            timeout_secs = DEFAULT_DRAIN_TIMEOUT.as_secs(),
            "in-flight requests did not finish before the drain timeout"
        );
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// The bootstrap command always fetches when artifacts are missing and
/// fails when it cannot produce them.
fn bootstrap_settings(settings: Settings, force: bool) -> Settings {
    Settings {
        require_local_model_store: true,
        auto_download_model_store: true,
        model_force_download: force || settings.model_force_download,
        ..settings
    }
}

async fn bootstrap(settings: Settings) -> Result<()> {
    let _ = ensure_ready(&settings, Arc::new(HubFetcher::default()))
        .await
        .context("Model store bootstrap failed")?;
    let repo_dir = resolve_repo_dir(&settings);
    tracing::info!(
        model_repo_id = %settings.model_repo_id,
        repo_dir = ?repo_dir,
        "model bootstrap completed"
    );
    println!("{}", repo_dir.display());
    Ok(())
}

async fn launch_backend(settings: Settings) -> Result<()> {
    let _ = ensure_ready(&settings, Arc::new(HubFetcher::default()))
        .await
        .context("Model store bootstrap failed")?;

    let model_dir = resolve_repo_dir(&settings);
    anyhow::ensure!(
        model_dir.is_dir(),
        "Local model directory does not exist: {}. Run `quill bootstrap` first or enable \
         OCR_AUTO_DOWNLOAD_MODEL_STORE",
        model_dir.display()
    );

    let launch = launcher::build_launch(&settings, &model_dir, |var| {
        std::env::var_os(var).is_some()
    })?;
    tracing::info!(
        program = %launch.program,
        args = ?launch.args,
        "handing off to inference backend"
    );
    launcher::exec(&launch)
}
