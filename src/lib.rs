//! Media Vault
//!
//! An HTTP service that accepts video uploads, persists them to a byte store
//! and serves them back, including HTTP Range requests.
//!
//! # Overview
//!
//! Reads and writes go through a [`TieredCache`]: an optional Redis-compatible
//! remote tier in front of an in-process memory tier. The remote tier is a
//! best-effort accelerator. When it fails the cache degrades to memory only
//! and reconnects in the background with a bounded number of attempts, so a
//! cache outage never fails a request.
//!
//! Uploads are validated (MIME allow-list and size limit), written to the
//! cache immediately and persisted to the [`ByteStore`] afterwards. Reads try
//! the cache, then the store, and repopulate the cache on a miss.
//!
//! # Architecture
//!
//! - [`MediaService`]: validate, save, retrieve, stat and list media
//! - [`TieredCache`]: remote-then-memory cache with graceful degradation
//! - [`RangeParser`]: parses single `bytes=start-end` Range headers
//! - [`ByteStore`]: durable storage ([`LocalFsStore`], [`MemoryStore`])
//! - [`MediaServer`]: hyper HTTP/1 server exposing the REST routes
//! - [`MediaMetrics`]: Prometheus metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use media_vault::{
//!     open_store, AppState, MediaConfig, MediaMetrics, MediaServer, MediaService, TieredCache,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MediaConfig::load(None)?;
//! let store = open_store(&config).await?;
//! let cache = Arc::new(TieredCache::from_config(&config).await?);
//! let metrics = Arc::new(MediaMetrics::new()?);
//! let service = MediaService::from_config(&config, Arc::clone(&cache), store)
//!     .with_metrics(Arc::clone(&metrics));
//!
//! let state = Arc::new(AppState::new(Arc::new(service), metrics));
//! let server = MediaServer::bind(config.socket_addr()?, state).await?;
//! server.run_until(media_vault::server::shutdown_signal()).await?;
//! cache.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Settings come from an optional YAML file overridden by environment
//! variables (`PORT`, `REDIS_URL`, `CACHE_TTL`, `MAX_UPLOAD_SIZE`, ...). See
//! [`MediaConfig`].

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod range;
pub mod server;
pub mod service;
pub mod store;

pub use cache::{CacheHealth, CacheSettings, ConnectionState, ReconnectPolicy, TieredCache};
pub use config::{MediaConfig, RemoteCacheConfig, StorageType};
pub use error::{MediaError, Result};
pub use handlers::AppState;
pub use metrics::MediaMetrics;
pub use models::{ByteRange, MediaEntry, ObjectStat, UploadedFile};
pub use range::RangeParser;
pub use server::MediaServer;
pub use service::{MediaContent, MediaService, RetrievalSource, UploadPolicy};
pub use store::{open_store, ByteStore, LocalFsStore, MemoryStore};
