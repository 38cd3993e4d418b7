//! Chunked transfer primitives shared by the upload server and client.
//!
//! A file of `total_size` bytes is split into `ceil(total_size / chunk_size)`
//! chunks; every chunk is `chunk_size` bytes except possibly the last.

mod chunked;
mod layout;
mod progress;
mod validation;

pub use chunked::{ChunkReader, checksum_bytes, verify_checksum};
pub use layout::ChunkLayout;
pub use progress::AttemptMeter;
pub use validation::{MAX_FILE_NAME_LEN, validate_file_name, validate_storage_key};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("too many chunks: {0}")]
    TooManyChunks(u64),

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("source changed size: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
