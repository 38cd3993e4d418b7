use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use crate::{ChunkStore, SessionMeta, StoreError, StoreFuture, validate_upload_id};

#[derive(Default)]
struct Session {
    meta: Option<SessionMeta>,
    chunks: BTreeMap<u32, Vec<u8>>,
}

/// In-memory chunk store, for tests and ephemeral servers.
#[derive(Default)]
pub struct MemoryChunkStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn save_meta<'a>(&'a self, meta: &'a SessionMeta) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            validate_upload_id(&meta.upload_id)?;
            let mut sessions = self.sessions.lock().await;
            sessions.entry(meta.upload_id.clone()).or_default().meta = Some(meta.clone());
            Ok(())
        })
    }

    fn load_meta<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Option<SessionMeta>> {
        Box::pin(async move {
            let sessions = self.sessions.lock().await;
            Ok(sessions.get(upload_id).and_then(|s| s.meta.clone()))
        })
    }

    fn put_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            validate_upload_id(upload_id)?;
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(upload_id.to_string())
                .or_default()
                .chunks
                .insert(index, data.to_vec());
            Ok(())
        })
    }

    fn received<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Vec<u32>> {
        Box::pin(async move {
            let sessions = self.sessions.lock().await;
            Ok(sessions
                .get(upload_id)
                .map(|s| s.chunks.keys().copied().collect())
                .unwrap_or_default())
        })
    }

    fn read_chunk<'a>(&'a self, upload_id: &'a str, index: u32) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let sessions = self.sessions.lock().await;
            sessions
                .get(upload_id)
                .and_then(|s| s.chunks.get(&index))
                .cloned()
                .ok_or_else(|| StoreError::ChunkNotFound {
                    upload_id: upload_id.to_string(),
                    index,
                })
        })
    }

    fn delete<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.lock().await.remove(upload_id);
            Ok(())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }
}
