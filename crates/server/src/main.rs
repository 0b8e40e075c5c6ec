use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use visionboost::{EnhancerConfig, Orchestrator};

mod error;
mod routes;

use routes::{build_router, AppState};

/// VisionBoost video enhancement server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overrides config and PORT
    #[arg(short, long)]
    port: Option<u16>,

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

    let mut cfg = EnhancerConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    cfg.apply_env_overrides()
        .context("Failed to apply environment overrides")?;
    if let Some(port) = args.port {
        cfg.port = port;
    }
    cfg.validate().context("Invalid configuration")?;

    info!("{} v{} starting", visionboost::SERVICE_NAME, visionboost::VERSION);
    info!("Configuration loaded:");
    info!("  Staging dir: {}", cfg.staging_dir.display());
    info!("  Output dir: {}", cfg.output_dir.display());
    info!("  FFmpeg binary: {}", cfg.ffmpeg_bin.display());
    info!("  Transcode timeout: {}s", cfg.transcode_timeout_secs);
    info!("  Concurrent transcodes: {}", cfg.max_concurrent_transcodes);
    info!("  Queued requests: {}", cfg.max_queued_requests);
    info!("  Max upload: {} bytes", cfg.max_upload_bytes);

    for dir in [&cfg.staging_dir, &cfg.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&cfg));

    // Nothing is admitted yet, so anything left in staging is from a previous run
    info!("🔄 Sweeping staging directory...");
    match orchestrator.store().sweep_staging().await {
        Ok(0) => info!("✅ Staging directory clean"),
        Ok(n) => info!("✅ Removed {} leftover staging file(s)", n),
        Err(e) => warn!("⚠️  Failed to sweep staging directory: {}", e),
    }

    let state = Arc::new(AppState { orchestrator });
    let app = build_router(state, cfg.max_upload_bytes);

    let addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("👋 Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown requested, draining in-flight requests");
}
