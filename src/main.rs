//! Media Vault server
//!
//! Loads configuration, sets up logging and serves the HTTP API until Ctrl-C
//! or SIGTERM.

use anyhow::Context;
use media_vault::server::shutdown_signal;
use media_vault::{
    open_store, AppState, MediaConfig, MediaMetrics, MediaServer, MediaService, TieredCache,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Open `<dir>/<name>` for appending through a background writer
fn file_writer(dir: &Path, name: &str) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// # Usage
/// ```bash
/// # Defaults plus environment overrides (.env is read if present)
/// cargo run
///
/// # With a YAML config file
/// cargo run -- /path/to/media_vault.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = MediaConfig::load(config_path.as_deref());

    // RUST_LOG wins over the configured level
    let level = config
        .as_ref()
        .map(|cfg| cfg.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let log_dir = config.as_ref().ok().and_then(|cfg| cfg.log_dir.clone());

    // Guards flush the file writers on drop, so they live until main returns
    let mut guards = Vec::new();
    let mut file_error = None;
    let (error_file, combined_file) = match &log_dir {
        Some(dir) => match (file_writer(dir, "error.log"), file_writer(dir, "combined.log")) {
            (Ok((error_writer, error_guard)), Ok((combined_writer, combined_guard))) => {
                guards.push(error_guard);
                guards.push(combined_guard);
                (
                    Some(
                        fmt::layer()
                            .with_ansi(false)
                            .with_writer(error_writer)
                            .with_filter(LevelFilter::ERROR),
                    ),
                    Some(fmt::layer().with_ansi(false).with_writer(combined_writer)),
                )
            }
            (Err(e), _) | (_, Err(e)) => {
                file_error = Some(e);
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .with(error_file)
        .with(combined_file)
        .init();

    if let Some(e) = file_error {
        warn!("File logging disabled: {}", e);
    }

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Media Vault");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Storage: {:?} ({})", config.storage_type, config.uploads_dir.display());
    info!("  - Remote cache: {}", if config.redis_url.is_some() { "configured" } else { "not configured" });
    info!("  - Cache TTL: {} seconds", config.cache_ttl);
    info!("  - Max upload size: {} bytes", config.max_upload_size);

    let store = open_store(&config).await.context("failed to open byte store")?;
    let cache = Arc::new(
        TieredCache::from_config(&config)
            .await
            .context("failed to create cache")?,
    );
    let metrics = Arc::new(MediaMetrics::new().context("failed to register metrics")?);
    let service = MediaService::from_config(&config, Arc::clone(&cache), store)
        .with_metrics(Arc::clone(&metrics));
    let state = Arc::new(AppState::new(Arc::new(service), metrics));

    let addr = config.socket_addr()?;
    let server = MediaServer::bind(addr, state).await?;
    let result = server.run_until(shutdown_signal()).await;

    cache.disconnect().await;
    info!("Media Vault stopped");
    drop(guards);
    result.map_err(Into::into)
}
