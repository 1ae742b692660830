//! Upload, retrieval and listing of media objects
//!
//! Uploads are written to the cache synchronously and persisted to the byte
//! store afterwards. Reads go cache first, then store, repopulating the cache
//! on a miss:
//!
//! ```text
//! Start -> CacheLookup -> Hit -> Done
//!                      -> Miss -> StoreRead -> Found -> Repopulate -> Done
//!                                           -> NotFound -> Fail
//! ```

use crate::cache::TieredCache;
use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::metrics::MediaMetrics;
use crate::models::{ByteRange, MediaEntry, ObjectStat, UploadedFile};
use crate::range::RangeParser;
use crate::store::ByteStore;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const CACHE_KEY_PREFIX: &str = "video:";

/// Upload acceptance rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub allowed_mime_types: Vec<String>,
    pub max_size: u64,
}

impl UploadPolicy {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            allowed_mime_types: config.allowed_mime_types.clone(),
            max_size: config.max_upload_size,
        }
    }

    /// Check type and size; no I/O
    pub fn validate(&self, file: &UploadedFile) -> Result<()> {
        let mime = file.mime_type.trim().to_ascii_lowercase();
        if !self.allowed_mime_types.iter().any(|allowed| *allowed == mime) {
            return Err(MediaError::UnsupportedType(file.mime_type.clone()));
        }

        if file.size() > self.max_size {
            return Err(MediaError::TooLarge {
                size: file.size(),
                max: self.max_size,
            });
        }

        Ok(())
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&MediaConfig::default())
    }
}

/// Content selected for a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaContent {
    Full(Bytes),
    Partial {
        range: ByteRange,
        total: u64,
        body: Bytes,
    },
}

impl MediaContent {
    pub fn body(&self) -> &Bytes {
        match self {
            MediaContent::Full(body) => body,
            MediaContent::Partial { body, .. } => body,
        }
    }
}

/// Where a retrieval was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    Cache,
    Store,
}

impl RetrievalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalSource::Cache => "cache",
            RetrievalSource::Store => "store",
        }
    }
}

/// Media operations over a cache and a byte store
pub struct MediaService {
    cache: Arc<TieredCache>,
    store: Arc<dyn ByteStore>,
    policy: UploadPolicy,
    write_behind: bool,
    metrics: Option<Arc<MediaMetrics>>,
}

impl MediaService {
    /// Create a service with write-behind persistence
    pub fn new(cache: Arc<TieredCache>, store: Arc<dyn ByteStore>, policy: UploadPolicy) -> Self {
        Self {
            cache,
            store,
            policy,
            write_behind: true,
            metrics: None,
        }
    }

    pub fn from_config(
        config: &MediaConfig,
        cache: Arc<TieredCache>,
        store: Arc<dyn ByteStore>,
    ) -> Self {
        Self::new(cache, store, UploadPolicy::from_config(config))
            .with_write_behind(config.write_behind)
    }

    /// Persist uploads in a detached task (`true`) or before `save` returns
    pub fn with_write_behind(mut self, enabled: bool) -> Self {
        self.write_behind = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MediaMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn validate(&self, file: &UploadedFile) -> Result<()> {
        self.policy.validate(file)
    }

    /// Accept an upload and return its identifier
    ///
    /// The content is readable from the cache as soon as this returns. With
    /// write-behind enabled a persistence failure is only logged, so the
    /// object can disappear once its cache entry expires.
    pub async fn save(&self, file: UploadedFile) -> Result<String> {
        if let Err(e) = self.validate(&file) {
            self.record_upload("rejected");
            return Err(e);
        }

        let id = generate_identifier(&file.original_name, Utc::now().timestamp_millis());
        self.cache.set(&cache_key(&id), file.bytes.clone()).await;

        if self.write_behind {
            let store = Arc::clone(&self.store);
            let name = id.clone();
            let bytes = file.bytes;
            tokio::spawn(async move {
                match store.write(&name, bytes).await {
                    Ok(()) => info!("Video persisted to storage: {}", name),
                    Err(e) => error!("Failed to persist video {}: {}", name, e),
                }
            });
        } else if let Err(e) = self.store.write(&id, file.bytes).await {
            error!("Failed to persist video {}: {}", id, e);
            self.record_upload("failed");
            return Err(e);
        }

        self.record_upload("accepted");
        info!("Video saved: {}", id);
        Ok(id)
    }

    /// Full content of `id`
    pub async fn retrieve(&self, id: &str) -> Result<Bytes> {
        self.retrieve_with_source(id).await.map(|(bytes, _)| bytes)
    }

    /// Full content of `id` and the tier that answered
    pub async fn retrieve_with_source(&self, id: &str) -> Result<(Bytes, RetrievalSource)> {
        let key = cache_key(id);

        if let Some(bytes) = self.cache.get(&key).await {
            debug!("Video served from cache: {}", id);
            self.record_retrieval(RetrievalSource::Cache);
            return Ok((bytes, RetrievalSource::Cache));
        }

        let bytes = self.store.read(id).await?;
        self.cache.set(&key, bytes.clone()).await;
        debug!("Video loaded from storage: {}", id);
        self.record_retrieval(RetrievalSource::Store);
        Ok((bytes, RetrievalSource::Store))
    }

    /// Content of `id`, narrowed to `range_header` when present
    ///
    /// A header that does not parse is ignored and the full content is
    /// returned. A window starting at or past the end of the content fails
    /// with `RangeNotSatisfiable`; an end past the content is clamped.
    pub async fn retrieve_range(&self, id: &str, range_header: Option<&str>) -> Result<MediaContent> {
        let bytes = self.retrieve(id).await?;

        let Some(header) = range_header else {
            return Ok(MediaContent::Full(bytes));
        };

        let total = bytes.len() as u64;
        let range = match RangeParser::parse(header, total) {
            Ok(range) => range,
            Err(e) => {
                debug!("Ignoring range header for {}: {}", id, e);
                return Ok(MediaContent::Full(bytes));
            }
        };

        let range = range.clamp_to(total)?;
        let body = bytes.slice(range.start as usize..=range.end as usize);
        Ok(MediaContent::Partial { range, total, body })
    }

    /// Durable metadata of `id`; bypasses the cache
    pub async fn stat(&self, id: &str) -> Result<ObjectStat> {
        self.store.stat(id).await
    }

    /// All stored objects, newest first
    ///
    /// Objects whose metadata cannot be read are skipped.
    pub async fn list(&self) -> Result<Vec<MediaEntry>> {
        let names = self.store.list().await.map_err(|e| {
            error!("Failed to list videos: {}", e);
            e
        })?;

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            match self.store.stat(&name).await {
                Ok(stat) => entries.push(MediaEntry::from_stat(name, stat)),
                Err(e) => warn!("Failed to read metadata of {}: {}", name, e),
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    fn record_upload(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_upload(result);
        }
    }

    fn record_retrieval(&self, source: RetrievalSource) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retrieval(source.as_str());
        }
    }
}

fn cache_key(id: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, id)
}

/// `<unix-millis>-<original name>` with separators and whitespace replaced
///
/// Uniqueness is best-effort: two uploads of the same name in the same
/// millisecond collide.
pub fn generate_identifier(original_name: &str, unix_millis: i64) -> String {
    let sanitized: String = original_name
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == '\0' || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let name = match sanitized.as_str() {
        "" | "." | ".." => "upload",
        name => name,
    };
    format!("{}-{}", unix_millis, name)
}
