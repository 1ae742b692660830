//! Error types for the media vault

use thiserror::Error;

/// Result type alias for media vault operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Error types that can occur while storing, caching or serving media
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Unsupported file type: {0}. Only video uploads are allowed")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("No file uploaded")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Invalid object name: {0}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Malformed range header: {0}")]
    MalformedRange(String),

    #[error("Range not satisfiable: start {start} is beyond content length {total}")]
    RangeNotSatisfiable { start: u64, total: u64 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        MediaError::Io(err.to_string())
    }
}

impl MediaError {
    /// Convert error to HTTP status code
    ///
    /// - Validation failures: 400 Bad Request
    /// - Missing objects: 404 Not Found
    /// - Out-of-bounds ranges: 416 Range Not Satisfiable
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            MediaError::UnsupportedType(_) => 400,
            MediaError::TooLarge { .. } => 400,
            MediaError::MissingFile => 400,
            MediaError::MalformedUpload(_) => 400,
            MediaError::InvalidName(_) => 400,
            MediaError::MalformedRange(_) => 400,

            MediaError::NotFound(_) => 404,

            MediaError::RangeNotSatisfiable { .. } => 416,

            MediaError::Cache(_) => 500,
            MediaError::Storage(_) => 500,
            MediaError::Config(_) => 500,
            MediaError::Io(_) => 500,
            MediaError::Http(_) => 500,
            MediaError::Internal(_) => 500,
        }
    }

    /// Whether the caller can fix the request and try again
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.to_http_status())
    }

    /// Whether this is an upload validation failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MediaError::UnsupportedType(_)
                | MediaError::TooLarge { .. }
                | MediaError::MissingFile
                | MediaError::MalformedUpload(_)
                | MediaError::InvalidName(_)
        )
    }

    /// Message safe to return to an HTTP client
    ///
    /// Server-side failures collapse to a generic message so storage paths
    /// and backend details never leave the process.
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        }
    }
}
