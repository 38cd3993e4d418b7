//! Server-side upload session lifecycle.
//!
//! Every operation on a session runs under that session's lock: chunk
//! writes and status reads share it, while finalize, cancel and the sweeper
//! take it exclusively. Finalize seals the session while holding the
//! exclusive lock, so no chunk write can land once assembly has begun.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use stowage_chunk_store::{ChunkStore, SessionMeta, validate_upload_id};
use stowage_protocol::{
    FileRecord, InitUploadRequest, InitUploadResponse, SessionStatus, UploadChunkRequest,
};
use stowage_transfer::{ChunkLayout, validate_file_name, validate_storage_key, verify_checksum};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::collaborators::{
    BackendError, BlobStore, ByteStream, ChangeEvent, ChangeNotifier, MetadataStore,
    NewFileRecord, QuotaService,
};
use crate::error::UploadError;

/// External services the manager calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub quota: Arc<dyn QuotaService>,
    pub blobs: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub notifier: Arc<dyn ChangeNotifier>,
}

/// Outcome of a sweep or reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle unsealed sessions cancelled.
    pub expired: usize,
    /// Storage areas without metadata removed.
    pub orphaned: usize,
    /// Sealed sessions whose finalize was carried to completion.
    pub resumed: usize,
    /// Sessions that could not be processed this pass.
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum SweepOutcome {
    Untouched,
    Expired,
    Orphaned,
    Resumed,
}

/// Owns upload sessions: create, record chunk, report status, finalize,
/// cancel, and the expiry/reconciliation passes.
pub struct UploadSessionManager {
    store: Arc<dyn ChunkStore>,
    collab: Collaborators,
    chunk_size: u64,
    locks: Mutex<HashMap<String, Weak<RwLock<()>>>>,
}

impl UploadSessionManager {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        collab: Collaborators,
        chunk_size: u64,
    ) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidInput("chunk size must be positive".into()));
        }
        Ok(Self {
            store,
            collab,
            chunk_size,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Server chunk size for new sessions.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Returns the lock for `upload_id`, creating it if nobody holds one.
    async fn session_lock(&self, upload_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(upload_id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(RwLock::new(()));
        locks.insert(upload_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Creates a session and returns its id with the server chunk size.
    pub async fn initialize(
        &self,
        req: InitUploadRequest,
    ) -> Result<InitUploadResponse, UploadError> {
        self.check_declared(&req.owner_id, &req.file_name, req.total_size, req.total_chunks)?;

        let upload_id = uuid::Uuid::new_v4().to_string();
        let meta = self.new_meta(
            &upload_id,
            &req.owner_id,
            &req.file_name,
            &req.mime_type,
            req.total_size,
            req.total_chunks,
            req.folder_id.clone(),
        );
        self.store.save_meta(&meta).await?;

        info!(
            upload_id = %upload_id,
            owner = %req.owner_id,
            file = %req.file_name,
            total_size = req.total_size,
            total_chunks = req.total_chunks,
            "upload session created"
        );
        Ok(InitUploadResponse {
            upload_id,
            chunk_size: self.chunk_size,
        })
    }

    /// Stores one chunk and returns the updated session status.
    ///
    /// Creates the session from the request fields if it does not exist.
    pub async fn upload_chunk(&self, req: UploadChunkRequest) -> Result<SessionStatus, UploadError> {
        validate_upload_id(&req.upload_id)?;
        let lock = self.session_lock(&req.upload_id).await;
        let _guard = lock.read().await;

        let (mut meta, created) = match self.store.load_meta(&req.upload_id).await? {
            Some(meta) => {
                check_owner(&meta, &req.owner_id)?;
                if meta.sealed {
                    return Err(UploadError::SessionSealed(req.upload_id.clone()));
                }
                (meta, false)
            }
            None => {
                self.check_declared(
                    &req.owner_id,
                    &req.file_name,
                    req.total_size,
                    req.total_chunks,
                )?;
                let meta = self.new_meta(
                    &req.upload_id,
                    &req.owner_id,
                    &req.file_name,
                    &req.mime_type,
                    req.total_size,
                    req.total_chunks,
                    req.folder_id.clone(),
                );
                (meta, true)
            }
        };

        if req.index >= meta.total_chunks {
            return Err(UploadError::InvalidChunkIndex {
                index: req.index,
                total_chunks: meta.total_chunks,
            });
        }
        let layout = session_layout(&meta)?;
        let expected = layout.chunk_len(req.index)?;
        if req.data.len() as u64 != expected {
            return Err(UploadError::InvalidInput(format!(
                "chunk {} is {} bytes, expected {expected}",
                req.index,
                req.data.len()
            )));
        }
        verify_checksum(&req.data, &req.checksum)?;

        // Only a chunk that will be stored creates its session.
        if created {
            self.store.save_meta(&meta).await?;
            info!(
                upload_id = %req.upload_id,
                owner = %req.owner_id,
                total_chunks = req.total_chunks,
                "upload session created on first chunk"
            );
        }
        self.store
            .put_chunk(&req.upload_id, req.index, &req.data)
            .await?;
        if !created {
            meta.last_activity = Utc::now();
            self.store.save_meta(&meta).await?;
        }
        debug!(
            upload_id = %req.upload_id,
            index = req.index,
            total_chunks = meta.total_chunks,
            "chunk received"
        );

        let received = self.store.received(&req.upload_id).await?;
        Ok(status_of(&meta, received))
    }

    /// Returns the session status, or `None` if the session does not exist.
    pub async fn get_status(
        &self,
        owner_id: &str,
        upload_id: &str,
    ) -> Result<Option<SessionStatus>, UploadError> {
        if validate_upload_id(upload_id).is_err() {
            return Ok(None);
        }
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.read().await;

        let Some(meta) = self.store.load_meta(upload_id).await? else {
            return Ok(None);
        };
        check_owner(&meta, owner_id)?;
        let received = self.store.received(upload_id).await?;
        Ok(Some(status_of(&meta, received)))
    }

    /// Assembles the chunks into a stored file and commits its metadata
    /// and quota usage.
    ///
    /// A failure after sealing leaves the session and its chunks in place;
    /// calling `finalize` again resumes from the first unfinished step.
    pub async fn finalize(&self, owner_id: &str, upload_id: &str) -> Result<FileRecord, UploadError> {
        if validate_upload_id(upload_id).is_err() {
            return Err(UploadError::UploadNotFound(upload_id.to_string()));
        }
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.write().await;

        let received = self.store.received(upload_id).await?;
        let mut meta = match self.store.load_meta(upload_id).await? {
            Some(meta) if is_consistent(&meta, upload_id) => meta,
            Some(_) => return Err(UploadError::MetadataMissing(upload_id.to_string())),
            None if received.is_empty() => {
                return Err(UploadError::UploadNotFound(upload_id.to_string()));
            }
            None => return Err(UploadError::MetadataMissing(upload_id.to_string())),
        };
        check_owner(&meta, owner_id)?;

        if let Some(missing_index) = first_missing(&received, meta.total_chunks) {
            return Err(UploadError::IncompleteUpload { missing_index });
        }

        if !meta.sealed {
            let key = storage_key_for(&meta)?;
            self.collab
                .quota
                .reserve(&meta.owner_id, meta.total_size, &key)
                .await?;
            meta.finalize.storage_key = Some(key.clone());
            meta.sealed = true;
            meta.last_activity = Utc::now();
            if let Err(e) = self.store.save_meta(&meta).await {
                if let Err(release) = self.collab.quota.release(&meta.owner_id, &key).await {
                    warn!(upload_id, "failed to release quota reservation: {release}");
                }
                return Err(e.into());
            }
            info!(upload_id, owner = %meta.owner_id, key = %key, "session sealed");
        } else {
            info!(upload_id, "resuming finalize of sealed session");
        }

        self.commit(&mut meta).await
    }

    /// Deletes the session and its chunks. Unknown ids succeed.
    pub async fn cancel(&self, owner_id: &str, upload_id: &str) -> Result<(), UploadError> {
        if validate_upload_id(upload_id).is_err() {
            return Ok(());
        }
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.write().await;

        let meta = self.store.load_meta(upload_id).await?;
        if let Some(meta) = &meta {
            check_owner(meta, owner_id)?;
            if meta.finalize.record.is_some() {
                // The file is already visible; only finalize may complete it.
                return Err(UploadError::SessionSealed(upload_id.to_string()));
            }
        }
        self.discard(upload_id, meta.as_ref()).await?;
        info!(upload_id, owner = owner_id, "upload cancelled");
        Ok(())
    }

    /// Carries every sealed, unfinished finalize to completion and removes
    /// storage areas that have no metadata. Run at startup.
    pub async fn reconcile(&self) -> Result<SweepReport, UploadError> {
        self.sweep_sessions(None).await
    }

    /// Like [`reconcile`](Self::reconcile), and also cancels unsealed
    /// sessions idle for longer than `ttl`.
    pub async fn sweep(&self, ttl: Duration) -> Result<SweepReport, UploadError> {
        self.sweep_sessions(Some(ttl)).await
    }

    async fn sweep_sessions(&self, ttl: Option<Duration>) -> Result<SweepReport, UploadError> {
        let now = Utc::now();
        let mut report = SweepReport::default();
        for upload_id in self.store.list().await? {
            match self.sweep_one(&upload_id, ttl, now).await {
                Ok(SweepOutcome::Untouched) => {}
                Ok(SweepOutcome::Expired) => report.expired += 1,
                Ok(SweepOutcome::Orphaned) => report.orphaned += 1,
                Ok(SweepOutcome::Resumed) => report.resumed += 1,
                Err(e) => {
                    warn!(upload_id = %upload_id, "sweep failed: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sweep_one(
        &self,
        upload_id: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, UploadError> {
        let lock = self.session_lock(upload_id).await;
        let _guard = lock.write().await;

        let Some(mut meta) = self.store.load_meta(upload_id).await? else {
            self.store.delete(upload_id).await?;
            info!(upload_id, "removed storage area without metadata");
            return Ok(SweepOutcome::Orphaned);
        };

        if meta.sealed {
            if meta.finalize.is_done() {
                self.store.delete(upload_id).await?;
            } else {
                let record = self.commit(&mut meta).await?;
                info!(upload_id, file_id = %record.id, "reconciled interrupted finalize");
            }
            return Ok(SweepOutcome::Resumed);
        }

        let Some(ttl) = ttl else {
            return Ok(SweepOutcome::Untouched);
        };
        let idle = (now - meta.last_activity).to_std().unwrap_or_default();
        if idle <= ttl {
            return Ok(SweepOutcome::Untouched);
        }
        self.discard(upload_id, Some(&meta)).await?;
        info!(
            upload_id,
            owner = %meta.owner_id,
            idle_secs = idle.as_secs(),
            "expired idle upload session"
        );
        Ok(SweepOutcome::Expired)
    }

    /// Runs the remaining finalize steps of a sealed session, persisting
    /// each one, then notifies and deletes the session.
    async fn commit(&self, meta: &mut SessionMeta) -> Result<FileRecord, UploadError> {
        let upload_id = meta.upload_id.clone();

        // Chosen when the session was sealed.
        let key = meta
            .finalize
            .storage_key
            .clone()
            .ok_or_else(|| UploadError::MetadataMissing(upload_id.clone()))?;

        if !meta.finalize.blob_written {
            let body = self.assemble(&upload_id, meta.total_chunks);
            self.collab.blobs.put(&key, body, &meta.mime_type).await?;
            meta.finalize.blob_written = true;
            self.store.save_meta(meta).await?;
            debug!(upload_id = %upload_id, key = %key, "blob written");
        }

        let record = match &meta.finalize.record {
            Some(record) => record.clone(),
            None => {
                let (path, folder_id) = self.destination(meta).await?;
                let record = self
                    .collab
                    .metadata
                    .create_file_record(NewFileRecord {
                        owner_id: meta.owner_id.clone(),
                        name: meta.file_name.clone(),
                        path,
                        mime_type: meta.mime_type.clone(),
                        size: meta.total_size,
                        storage_key: key.clone(),
                        folder_id,
                    })
                    .await?;
                meta.finalize.record = Some(record.clone());
                self.store.save_meta(meta).await?;
                record
            }
        };

        if !meta.finalize.quota_applied {
            self.collab
                .quota
                .apply_usage(&meta.owner_id, meta.total_size, &key)
                .await?;
            meta.finalize.quota_applied = true;
            self.store.save_meta(meta).await?;
        }

        self.collab.notifier.notify(ChangeEvent::FileCreated {
            record: record.clone(),
        });

        if let Err(e) = self.store.delete(&upload_id).await {
            // Committed; the sweeper removes the leftover area.
            warn!(upload_id = %upload_id, "failed to remove finalized session: {e}");
        }
        info!(
            upload_id = %upload_id,
            file_id = %record.id,
            path = %record.path,
            size = record.size,
            "upload finalized"
        );
        Ok(record)
    }

    /// Streams the session's chunks in index order.
    fn assemble<'a>(&'a self, upload_id: &'a str, total_chunks: u32) -> ByteStream<'a> {
        futures_util::stream::iter(0..total_chunks)
            .then(move |index| async move {
                self.store
                    .read_chunk(upload_id, index)
                    .await
                    .map_err(|e| BackendError::Other(format!("reading chunk {index}: {e}")))
            })
            .boxed()
    }

    /// Path and folder of the finished file. An unknown folder falls back
    /// to the root.
    async fn destination(
        &self,
        meta: &SessionMeta,
    ) -> Result<(String, Option<String>), UploadError> {
        let root_path = format!("/{}", meta.file_name);
        let Some(folder_id) = &meta.folder_id else {
            return Ok((root_path, None));
        };
        match self
            .collab
            .metadata
            .folder_path(&meta.owner_id, folder_id)
            .await?
        {
            Some(prefix) => Ok((
                format!("{}/{}", prefix.trim_end_matches('/'), meta.file_name),
                Some(folder_id.clone()),
            )),
            None => {
                warn!(
                    upload_id = %meta.upload_id,
                    folder_id = %folder_id,
                    "destination folder not found, storing at root"
                );
                Ok((root_path, None))
            }
        }
    }

    /// Deletes a session's chunks and any blob written for it, and frees
    /// its quota reservation.
    async fn discard(&self, upload_id: &str, meta: Option<&SessionMeta>) -> Result<(), UploadError> {
        if let Some(meta) = meta
            && let Some(key) = meta.finalize.storage_key.as_deref()
        {
            self.collab.blobs.delete(key).await?;
            debug!(upload_id, key, "orphaned blob removed");
            if !meta.finalize.quota_applied {
                self.collab.quota.release(&meta.owner_id, key).await?;
            }
        }
        self.store.delete(upload_id).await?;
        Ok(())
    }

    fn check_declared(
        &self,
        owner_id: &str,
        file_name: &str,
        total_size: u64,
        total_chunks: u32,
    ) -> Result<(), UploadError> {
        if owner_id.is_empty() {
            return Err(UploadError::InvalidInput("ownerId is required".into()));
        }
        // The owner id is the first segment of every storage key.
        validate_file_name(owner_id)
            .map_err(|e| UploadError::InvalidInput(format!("invalid ownerId: {e}")))?;
        validate_file_name(file_name)?;
        let layout = ChunkLayout::new(total_size, self.chunk_size)?;
        if layout.total_chunks() != total_chunks {
            return Err(UploadError::InvalidInput(format!(
                "totalChunks {total_chunks} does not match {} for {total_size} bytes at chunk size {}",
                layout.total_chunks(),
                self.chunk_size
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn new_meta(
        &self,
        upload_id: &str,
        owner_id: &str,
        file_name: &str,
        mime_type: &str,
        total_size: u64,
        total_chunks: u32,
        folder_id: Option<String>,
    ) -> SessionMeta {
        let now = Utc::now();
        SessionMeta {
            upload_id: upload_id.to_string(),
            owner_id: owner_id.to_string(),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            total_size,
            total_chunks,
            chunk_size: self.chunk_size,
            folder_id,
            created_at: now,
            last_activity: now,
            sealed: false,
            finalize: Default::default(),
        }
    }
}

/// `{owner}/{uuid}-{file}`, fresh for every sealing.
fn storage_key_for(meta: &SessionMeta) -> Result<String, UploadError> {
    let key = format!("{}/{}-{}", meta.owner_id, uuid::Uuid::new_v4(), meta.file_name);
    validate_storage_key(&key)?;
    Ok(key)
}

fn check_owner(meta: &SessionMeta, owner_id: &str) -> Result<(), UploadError> {
    if meta.owner_id == owner_id {
        Ok(())
    } else {
        warn!(upload_id = %meta.upload_id, owner = owner_id, "owner mismatch");
        Err(UploadError::Forbidden(meta.upload_id.clone()))
    }
}

fn session_layout(meta: &SessionMeta) -> Result<ChunkLayout, UploadError> {
    ChunkLayout::new(meta.total_size, meta.chunk_size)
        .map_err(|_| UploadError::MetadataMissing(meta.upload_id.clone()))
}

fn is_consistent(meta: &SessionMeta, upload_id: &str) -> bool {
    meta.upload_id == upload_id
        && session_layout(meta).is_ok_and(|l| l.total_chunks() == meta.total_chunks)
}

fn first_missing(received: &[u32], total_chunks: u32) -> Option<u32> {
    (0..total_chunks).find(|i| received.binary_search(i).is_err())
}

fn status_of(meta: &SessionMeta, mut received: Vec<u32>) -> SessionStatus {
    received.retain(|&i| i < meta.total_chunks);
    SessionStatus {
        upload_id: meta.upload_id.clone(),
        chunks_received: received,
        total_chunks: meta.total_chunks,
        file_name: meta.file_name.clone(),
        total_size: meta.total_size,
    }
}
