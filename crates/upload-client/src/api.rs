//! The session API the coordinator drives.

use std::future::Future;
use std::pin::Pin;

use stowage_protocol::{
    FileRecord, InitUploadRequest, InitUploadResponse, SessionStatus, UploadChunkRequest,
};

use crate::error::ClientError;

/// A boxed future returned by [`SessionApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Server-side upload session operations.
///
/// [`crate::WsSessionApi`] implements this over WebSocket; tests use mocks.
/// Every call may fail with a transient error the caller is free to retry.
pub trait SessionApi: Send + Sync {
    /// Fixed chunk size of the server.
    fn get_chunk_size(&self) -> ApiFuture<'_, u64>;

    fn initialize(&self, req: InitUploadRequest) -> ApiFuture<'_, InitUploadResponse>;

    fn upload_chunk(&self, req: UploadChunkRequest) -> ApiFuture<'_, SessionStatus>;

    /// Returns `None` when the server does not know the session.
    fn get_status<'a>(
        &'a self,
        owner_id: &'a str,
        upload_id: &'a str,
    ) -> ApiFuture<'a, Option<SessionStatus>>;

    fn finalize<'a>(&'a self, owner_id: &'a str, upload_id: &'a str) -> ApiFuture<'a, FileRecord>;

    fn cancel<'a>(&'a self, owner_id: &'a str, upload_id: &'a str) -> ApiFuture<'a, ()>;
}
