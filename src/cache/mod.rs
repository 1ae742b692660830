//! Two-tier cache: remote (shared) tier in front of an in-process memory tier
//!
//! - Remote tier: a Redis-compatible server, used only while the connection
//!   is `Ready`. Any remote error is absorbed: the connection is marked
//!   `Degraded`, a bounded reconnection sequence starts and the request is
//!   answered from memory.
//! - Memory tier: always written, so a value is readable from this process
//!   for its TTL regardless of remote health. Expiry is checked on every read
//!   and a single background sweep reclaims expired entries.
//!
//! Reads prefer the remote tier and fall through to memory.

mod connection;
mod memory;
pub mod remote;
pub mod resp;

pub use connection::{ConnectionState, ReconnectPolicy};
pub use memory::{CacheEntry, MemoryTier};
pub use remote::{RedisEndpoint, RemoteConnector, RemoteTier, RespConnection, RespConnector};

use crate::config::MediaConfig;
use crate::error::Result;
use bytes::Bytes;
use connection::RemoteLink;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Construction parameters of a [`TieredCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// TTL applied by [`TieredCache::set`]
    pub default_ttl: Duration,
    /// Period of the expired-entry sweep of the memory tier
    pub sweep_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl CacheSettings {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            default_ttl: config.cache_ttl(),
            sweep_interval: config.sweep_interval(),
            reconnect: ReconnectPolicy {
                delay: config.remote.reconnect_delay(),
                max_attempts: config.remote.max_reconnect_attempts,
            },
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&MediaConfig::default())
    }
}

/// Counters kept by the cache
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    remote_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub remote_errors: u64,
    pub reconnect_attempts: u64,
}

impl CacheStats {
    fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Result of [`TieredCache::health_check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    /// The remote tier is `Ready`
    pub remote_available: bool,
    /// Outcome of the liveness probe; `None` when no probe was sent
    pub remote_reachable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    pub memory_entry_count: usize,
    pub connection_state: ConnectionState,
    pub stats: CacheStatsSnapshot,
}

/// Remote-then-memory cache with graceful degradation
pub struct TieredCache {
    memory: Arc<MemoryTier>,
    link: Option<Arc<RemoteLink>>,
    default_ttl: Duration,
    stats: Arc<CacheStats>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TieredCache {
    /// Create a cache without a remote tier (`Unconfigured`)
    ///
    /// Must be called from within a Tokio runtime; the expiry sweep is
    /// spawned immediately.
    pub fn memory_only(settings: CacheSettings) -> Self {
        info!("Remote cache not configured. Using memory cache only");
        Self::build(settings, None, Arc::new(CacheStats::default()))
    }

    /// Create a cache backed by `connector`
    ///
    /// The first handshake is attempted before returning. On failure the
    /// cache starts `Degraded` and reconnection proceeds in the background.
    pub async fn connect(settings: CacheSettings, connector: Arc<dyn RemoteConnector>) -> Self {
        let stats = Arc::new(CacheStats::default());
        let link = RemoteLink::start(connector, settings.reconnect, Arc::clone(&stats));

        info!("Connecting to remote cache at {}", link.endpoint());
        if !link.establish().await {
            link.connection_lost();
        }

        Self::build(settings, Some(link), stats)
    }

    /// Create the cache described by `config`
    ///
    /// Without `redis_url` the cache is memory-only.
    pub async fn from_config(config: &MediaConfig) -> Result<Self> {
        let settings = CacheSettings::from_config(config);
        match &config.redis_url {
            Some(url) => {
                let connector = RespConnector::from_url(
                    url,
                    config.remote.connect_timeout(),
                    config.remote.command_timeout(),
                )?;
                Ok(Self::connect(settings, Arc::new(connector)).await)
            }
            None => Ok(Self::memory_only(settings)),
        }
    }

    fn build(settings: CacheSettings, link: Option<Arc<RemoteLink>>, stats: Arc<CacheStats>) -> Self {
        let memory = Arc::new(MemoryTier::new());
        let sweeper = spawn_sweeper(Arc::downgrade(&memory), settings.sweep_interval);

        TieredCache {
            memory,
            link,
            default_ttl: settings.default_ttl,
            stats,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Store `value` for the default TTL
    pub async fn set(&self, key: &str, value: Bytes) {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    /// Store `value` for `ttl`
    ///
    /// The remote tier is written first when `Ready`; the memory tier is
    /// always written. Remote failures are absorbed.
    pub async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) {
        if let Some((generation, remote)) = self.active_remote() {
            match remote.set(key, value.clone(), ttl).await {
                Ok(()) => debug!("Remote cache set: {}", key),
                Err(e) => self.remote_failed(generation, "set", &e.to_string()),
            }
        }

        self.memory.set(key, value, ttl).await;
        debug!("Memory cache set: {}", key);
    }

    /// Look up `key`, remote tier first
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some((generation, remote)) = self.active_remote() {
            match remote.get(key).await {
                Ok(Some(value)) => {
                    self.stats.record_remote_hit();
                    debug!("Remote cache hit: {}", key);
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => self.remote_failed(generation, "get", &e.to_string()),
            }
        }

        match self.memory.get(key).await {
            Some(value) => {
                self.stats.record_memory_hit();
                debug!("Memory cache hit: {}", key);
                Some(value)
            }
            None => {
                self.stats.record_miss();
                debug!("Cache miss: {}", key);
                None
            }
        }
    }

    /// Best-effort removal from both tiers
    pub async fn delete(&self, key: &str) {
        if let Some((generation, remote)) = self.active_remote() {
            match remote.delete(key).await {
                Ok(()) => debug!("Remote cache delete: {}", key),
                Err(e) => self.remote_failed(generation, "delete", &e.to_string()),
            }
        }

        self.memory.delete(key).await;
        debug!("Memory cache delete: {}", key);
    }

    /// Report tier availability, probing the remote tier when `Ready`
    ///
    /// A failed probe is reported but does not change the connection state,
    /// unless it left the connection closed.
    pub async fn health_check(&self) -> CacheHealth {
        let (remote_reachable, remote_error) = match self.active_remote() {
            Some((generation, remote)) => match remote.ping().await {
                Ok(()) => (Some(true), None),
                Err(e) => {
                    if !remote.is_open() {
                        self.remote_failed(generation, "ping", &e.to_string());
                    }
                    (Some(false), Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        let connection_state = self.connection_state();
        CacheHealth {
            remote_available: connection_state == ConnectionState::Ready,
            remote_reachable,
            remote_error,
            memory_entry_count: self.memory.len().await,
            connection_state,
            stats: self.stats.snapshot(),
        }
    }

    /// Close the remote connection and stop the sweep; idempotent
    pub async fn disconnect(&self) {
        if let Some(task) = self.take_sweeper() {
            task.abort();
        }
        if let Some(link) = &self.link {
            link.shutdown().await;
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        match &self.link {
            Some(link) => link.state(),
            None => ConnectionState::Unconfigured,
        }
    }

    /// Reconnection attempts made in the current retry sequence
    pub fn reconnect_attempts(&self) -> u32 {
        self.link.as_ref().map(|link| link.attempts()).unwrap_or(0)
    }

    /// Whether the retry cap was reached and the cache stays memory-only
    pub fn reconnects_exhausted(&self) -> bool {
        self.link
            .as_ref()
            .map(|link| link.retries_exhausted())
            .unwrap_or(false)
    }

    pub async fn memory_entry_count(&self) -> usize {
        self.memory.len().await
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn active_remote(&self) -> Option<(u64, Arc<dyn RemoteTier>)> {
        self.link.as_ref().and_then(|link| link.active())
    }

    fn remote_failed(&self, generation: u64, operation: &str, error: &str) {
        if let Some(link) = &self.link {
            link.report_failure(generation, operation, error);
        }
    }

    fn take_sweeper(&self) -> Option<JoinHandle<()>> {
        self.sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(task) = self.take_sweeper() {
            task.abort();
        }
    }
}

/// Periodic removal of expired memory entries
///
/// Holds only a weak reference so the task ends with the cache.
fn spawn_sweeper(memory: Weak<MemoryTier>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(memory) = memory.upgrade() else {
                break;
            };
            let removed = memory.sweep_expired().await;
            if removed > 0 {
                debug!("Swept {} expired memory cache entries", removed);
            }
        }
    })
}
