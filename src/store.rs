//! Durable byte storage for uploaded media
//!
//! [`ByteStore`] is the seam to the persistent copy of every object. Two
//! backends are provided: [`LocalFsStore`] (files under a base directory) and
//! [`MemoryStore`] (process memory, mostly for development and tests).

use crate::config::{MediaConfig, StorageType};
use crate::error::{MediaError, Result};
use crate::models::ObjectStat;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Storage of named byte blobs
#[async_trait]
pub trait ByteStore: Send + Sync {
    /// Create or replace `name`
    async fn write(&self, name: &str, bytes: Bytes) -> Result<()>;

    /// Read all of `name`; `MediaError::NotFound` when absent
    async fn read(&self, name: &str) -> Result<Bytes>;

    /// Metadata of `name`; `MediaError::NotFound` when absent
    async fn stat(&self, name: &str) -> Result<ObjectStat>;

    /// Names of all stored objects, in no particular order
    async fn list(&self) -> Result<Vec<String>>;
}

/// Open the store selected by `config`
pub async fn open_store(config: &MediaConfig) -> Result<Arc<dyn ByteStore>> {
    match config.storage_type {
        StorageType::Local => Ok(Arc::new(LocalFsStore::open(&config.uploads_dir).await?)),
        StorageType::Memory => {
            info!("Using in-memory byte store; uploads are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Reject names that could address anything outside the store root
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(MediaError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Files in a single directory
pub struct LocalFsStore {
    base_dir: PathBuf,
}

impl LocalFsStore {
    /// Open the store, creating `base_dir` if needed
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if fs::metadata(&base_dir).await.is_err() {
            fs::create_dir_all(&base_dir).await.map_err(|e| {
                MediaError::Storage(format!(
                    "Failed to create storage directory {}: {}",
                    base_dir.display(),
                    e
                ))
            })?;
            info!("Storage directory created: {}", base_dir.display());
        }
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.base_dir.join(name))
    }
}

#[async_trait]
impl ByteStore for LocalFsStore {
    async fn write(&self, name: &str, bytes: Bytes) -> Result<()> {
        let path = self.path_of(name)?;
        fs::write(&path, &bytes)
            .await
            .map_err(|e| storage_error(name, "write", e))?;
        debug!("Local file saved: {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.path_of(name)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| storage_error(name, "read", e))?;
        Ok(Bytes::from(data))
    }

    async fn stat(&self, name: &str) -> Result<ObjectStat> {
        let path = self.path_of(name)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| storage_error(name, "stat", e))?;
        if !metadata.is_file() {
            return Err(MediaError::NotFound(name.to_string()));
        }

        let modified = metadata
            .modified()
            .map_err(|e| storage_error(name, "stat", e))?;
        // Not every filesystem records a birth time
        let created = metadata.created().unwrap_or(modified);

        Ok(ObjectStat {
            size: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
            modified_at: DateTime::<Utc>::from(modified),
        })
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to list storage directory: {}", e)))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to list storage directory: {}", e)))?
        {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!("Skipping non UTF-8 file name: {:?}", raw),
            }
        }
        Ok(names)
    }
}

fn storage_error(name: &str, operation: &str, err: std::io::Error) -> MediaError {
    if err.kind() == ErrorKind::NotFound {
        MediaError::NotFound(name.to_string())
    } else {
        MediaError::Storage(format!("Failed to {} {}: {}", operation, name, err))
    }
}

struct StoredObject {
    bytes: Bytes,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

/// Objects held in process memory
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ByteStore for MemoryStore {
    async fn write(&self, name: &str, bytes: Bytes) -> Result<()> {
        validate_name(name)?;
        let now = Utc::now();
        let mut objects = self.objects.write().await;
        match objects.get_mut(name) {
            Some(object) => {
                object.bytes = bytes;
                object.modified_at = now;
            }
            None => {
                objects.insert(
                    name.to_string(),
                    StoredObject {
                        bytes,
                        created_at: now,
                        modified_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        validate_name(name)?;
        self.objects
            .read()
            .await
            .get(name)
            .map(|object| object.bytes.clone())
            .ok_or_else(|| MediaError::NotFound(name.to_string()))
    }

    async fn stat(&self, name: &str) -> Result<ObjectStat> {
        validate_name(name)?;
        self.objects
            .read()
            .await
            .get(name)
            .map(|object| ObjectStat {
                size: object.bytes.len() as u64,
                created_at: object.created_at,
                modified_at: object.modified_at,
            })
            .ok_or_else(|| MediaError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }
}
