//! Upload error taxonomy and its wire mapping.

use stowage_chunk_store::StoreError;
use stowage_protocol::constants::*;
use stowage_transfer::TransferError;

use crate::collaborators::BackendError;

/// Errors produced by [`crate::UploadSessionManager`].
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("chunk index {index} out of range (total {total_chunks})")]
    InvalidChunkIndex { index: u32, total_chunks: u32 },

    #[error("upload {0} is sealed")]
    SessionSealed(String),

    #[error("upload {0} not found")]
    UploadNotFound(String),

    #[error("upload {0} has missing or inconsistent metadata")]
    MetadataMissing(String),

    #[error("upload incomplete: missing chunk {missing_index}")]
    IncompleteUpload { missing_index: u32 },

    #[error("quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("upload {0} belongs to another user")]
    Forbidden(String),

    #[error("chunk store error: {0}")]
    Store(StoreError),

    #[error("backend error: {0}")]
    Backend(BackendError),
}

impl UploadError {
    /// Numeric code carried in the wire error body.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => ERR_INVALID_INPUT,
            Self::InvalidChunkIndex { .. } => ERR_INVALID_CHUNK_INDEX,
            Self::SessionSealed(_) => ERR_SESSION_SEALED,
            Self::UploadNotFound(_) => ERR_UPLOAD_NOT_FOUND,
            Self::MetadataMissing(_) => ERR_METADATA_MISSING,
            Self::IncompleteUpload { .. } => ERR_INCOMPLETE_UPLOAD,
            Self::QuotaExceeded { .. } => ERR_QUOTA_EXCEEDED,
            Self::Forbidden(_) => ERR_FORBIDDEN,
            Self::Store(_) | Self::Backend(_) => ERR_INTERNAL,
        }
    }

    /// Machine-readable kind carried in the wire error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidChunkIndex { .. } => "invalid_chunk_index",
            Self::SessionSealed(_) => "session_sealed",
            Self::UploadNotFound(_) => "upload_not_found",
            Self::MetadataMissing(_) => "metadata_missing",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Forbidden(_) => "forbidden",
            Self::Store(_) | Self::Backend(_) => "internal",
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidId(id) => Self::InvalidInput(format!("invalid upload id: {id:?}")),
            other => Self::Store(other),
        }
    }
}

impl From<BackendError> for UploadError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::QuotaExceeded { needed, available } => {
                Self::QuotaExceeded { needed, available }
            }
            other => Self::Backend(other),
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}
