//! Boundaries to the services the upload core depends on but does not own.
//!
//! Quota bookkeeping, the durable blob store, the file metadata store and
//! change notification delivery all live outside this crate. Reference
//! implementations are in [`crate::backends`].

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use stowage_protocol::FileRecord;

/// Boxed future returned by collaborator methods.
pub type BackendFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Stream of blob content in order.
pub type ByteStream<'a> = BoxStream<'a, Result<Vec<u8>, BackendError>>;

/// Errors reported by collaborators.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Storage quota per owner.
pub trait QuotaService: Send + Sync {
    /// Holds `bytes` of the owner's quota for `storage_key`.
    ///
    /// Fails with [`BackendError::QuotaExceeded`] unless they fit beside
    /// the used quota and every other open reservation. The check and the
    /// hold are one atomic step. Reserving a held or applied key again
    /// succeeds without counting twice.
    fn reserve<'a>(
        &'a self,
        owner_id: &'a str,
        bytes: u64,
        storage_key: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Turns the reservation for `storage_key` into used quota, adding
    /// `bytes` if none was held. Applying the same key twice counts once.
    fn apply_usage<'a>(
        &'a self,
        owner_id: &'a str,
        bytes: u64,
        storage_key: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Drops an unapplied reservation. Unknown keys succeed.
    fn release<'a>(&'a self, owner_id: &'a str, storage_key: &'a str) -> BackendFuture<'a, ()>;
}

/// Durable store for finished file bytes.
pub trait BlobStore: Send + Sync {
    /// Stores the stream under `key`, replacing any previous content.
    /// Returns the key.
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: ByteStream<'a>,
        content_type: &'a str,
    ) -> BackendFuture<'a, String>;

    fn get<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ByteStream<'static>>;

    /// Removes `key`; unknown keys are not an error.
    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()>;
}

/// Fields of a file record to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub owner_id: String,
    pub name: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub storage_key: String,
    pub folder_id: Option<String>,
}

/// File and folder metadata.
pub trait MetadataStore: Send + Sync {
    /// Path of the owner's folder `folder_id`, or `None` if it does not exist.
    fn folder_path<'a>(
        &'a self,
        owner_id: &'a str,
        folder_id: &'a str,
    ) -> BackendFuture<'a, Option<String>>;

    /// Creates a file record. A second call with the same storage key
    /// returns the record created by the first.
    fn create_file_record(&self, fields: NewFileRecord) -> BackendFuture<'_, FileRecord>;
}

/// Change emitted after a successful finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    FileCreated { record: FileRecord },
}

/// Fire-and-forget change notification sink.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: ChangeEvent);
}
