//! Core data models for the media vault

use crate::error::{MediaError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents an inclusive byte window of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(MediaError::MalformedRange)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(MediaError::MalformedRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Number of bytes covered by this range, never zero
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Fit this range into an object of `total` bytes
    ///
    /// A start beyond the last byte cannot produce a slice and is rejected;
    /// an end beyond the last byte is pulled back to it.
    pub fn clamp_to(&self, total: u64) -> Result<Self> {
        if total == 0 || self.start >= total {
            return Err(MediaError::RangeNotSatisfiable {
                start: self.start,
                total,
            });
        }
        Ok(ByteRange {
            start: self.start,
            end: self.end.min(total - 1),
        })
    }

    /// Value for a `Content-Range` response header
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Durable metadata of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStat {
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One record of a media listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub filename: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MediaEntry {
    pub fn from_stat(filename: impl Into<String>, stat: ObjectStat) -> Self {
        MediaEntry {
            filename: filename.into(),
            size: stat.size,
            created_at: stat.created_at,
            modified_at: stat.modified_at,
        }
    }
}

/// A file received from an upload form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Filename as sent by the client
    pub original_name: String,
    /// Declared MIME type of the upload
    pub mime_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        UploadedFile {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
