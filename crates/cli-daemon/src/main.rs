use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use subflix::{ffmpeg, FfmpegEncoder, JsonFileStore, RecordStore, SubflixConfig, SubflixService};

mod api;

/// Subtitle embedding daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = SubflixConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Subflix daemon starting");
    info!("Configuration loaded:");
    info!("  State dir: {}", cfg.state_dir.display());
    info!("  Bind address: {}", cfg.bind_addr);
    info!("  FFmpeg: {}", cfg.ffmpeg_bin.display());
    info!("  Workers: {} (queue {})", cfg.max_concurrent_jobs, cfg.queue_capacity);
    info!("  Encoder timeout: {}s", cfg.encoder_timeout_secs);

    let store = Arc::new(
        JsonFileStore::open(&cfg.state_dir)
            .with_context(|| format!("Failed to open record store: {}", cfg.state_dir.display()))?,
    );

    // A missing encoder only fails jobs; the API stays useful for scanning
    match ffmpeg::probe_version(&cfg.ffmpeg_bin).await {
        Ok(version) => info!("Using FFmpeg {} at {}", version, cfg.ffmpeg_bin.display()),
        Err(e) => warn!("FFmpeg is not usable, jobs will fail until it is: {:#}", e),
    }

    let encoder = Arc::new(FfmpegEncoder::new(cfg.ffmpeg_bin.clone()).with_timeout(cfg.encoder_timeout()));
    let service = Arc::new(SubflixService::new(store.clone(), cfg.clone(), encoder));

    info!("Starting recovery checks...");
    let report = service
        .recover()
        .await
        .context("Failed to recover interrupted jobs on startup")?;
    info!(
        "Startup recovery complete: {} job(s) failed, {} video(s) reset",
        report.failed_jobs, report.reset_videos
    );

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    info!("Listening on http://{}", cfg.bind_addr);

    axum::serve(listener, api::router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down, waiting for running jobs...");
    service.shutdown().await;
    store.close().await.context("Failed to close record store")?;
    info!("Subflix daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
