//! Session-scoped staging area for chunked uploads.
//!
//! A [`ChunkStore`] holds, per upload id, the session metadata and the
//! chunks received so far. Chunk writes are atomic: a reader sees either
//! the previous content of an index or the complete new one.

use std::future::Future;
use std::pin::Pin;

mod fs;
mod memory;
mod meta;

pub use fs::FsChunkStore;
pub use memory::MemoryChunkStore;
pub use meta::{FinalizeProgress, SessionMeta};

/// Longest upload id accepted by [`validate_upload_id`].
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// Boxed future returned by [`ChunkStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors produced by chunk stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid upload id: {0:?}")]
    InvalidId(String),

    #[error("chunk {index} of {upload_id} not found")]
    ChunkNotFound { upload_id: String, index: u32 },
}

/// Storage for in-flight upload sessions.
///
/// Implementations must make `put_chunk` and `save_meta` atomic per key and
/// treat `delete` of an unknown id as success. Serialising writes against
/// assembly is the caller's job.
pub trait ChunkStore: Send + Sync {
    /// Persists session metadata, creating the session's area if needed.
    fn save_meta<'a>(&'a self, meta: &'a SessionMeta) -> StoreFuture<'a, ()>;

    /// Loads session metadata; `None` if the session or its metadata is absent.
    fn load_meta<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Option<SessionMeta>>;

    /// Stores chunk `index`, replacing any previous content.
    fn put_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, ()>;

    /// Indices of all stored chunks, ascending.
    fn received<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Vec<u32>>;

    /// Reads chunk `index` in full.
    fn read_chunk<'a>(&'a self, upload_id: &'a str, index: u32) -> StoreFuture<'a, Vec<u8>>;

    /// Removes the session and all of its chunks.
    fn delete<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, ()>;

    /// Ids of every session with a storage area, metadata or not.
    fn list(&self) -> StoreFuture<'_, Vec<String>>;
}

/// Checks that `id` is usable as a storage key: 1..=128 characters from
/// `[A-Za-z0-9_-]`.
pub fn validate_upload_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= MAX_UPLOAD_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}
