//! In-process cache tier with per-entry expiry

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// A cached value and the moment it stops being readable
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub written_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            written_at: Instant::now(),
            ttl,
        }
    }

    /// Readable only while `now - written_at < ttl`
    pub fn is_live_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) < self.ttl
    }
}

/// Shared map of live entries
///
/// Expired entries are hidden on read and removed either by the reader that
/// finds them or by [`MemoryTier::sweep_expired`].
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Re-check under the write lock; a writer may have refreshed the key
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_live_at(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                debug!("Memory cache entry expired: {}", key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// Returns whether an entry was present
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet removed
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        before - entries.len()
    }
}
