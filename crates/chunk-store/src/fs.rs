use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::{ChunkStore, SessionMeta, StoreError, StoreFuture, validate_upload_id};

const META_FILE: &str = "meta.json";
const CHUNK_PREFIX: &str = "chunk_";

/// Chunk store on the local filesystem.
///
/// Layout: `<root>/<upload_id>/meta.json` plus one `chunk_<index>` file per
/// received chunk. Every file is written to a uniquely named temporary
/// file in the same directory and renamed into place.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, upload_id: &str) -> Result<PathBuf, StoreError> {
        validate_upload_id(upload_id)?;
        Ok(self.root.join(upload_id))
    }
}

fn chunk_file_name(index: u32) -> String {
    format!("{CHUNK_PREFIX}{index}")
}

fn parse_chunk_file_name(name: &str) -> Option<u32> {
    name.strip_prefix(CHUNK_PREFIX)?.parse().ok()
}

/// Writes `data` to `dir/name` via a temporary file and rename.
async fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> std::io::Result<()> {
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, dir.join(name)).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

impl ChunkStore for FsChunkStore {
    fn save_meta<'a>(&'a self, meta: &'a SessionMeta) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.session_dir(&meta.upload_id)?;
            tokio::fs::create_dir_all(&dir).await?;
            let json = serde_json::to_vec_pretty(meta)?;
            write_atomic(&dir, META_FILE, &json).await?;
            trace!(upload_id = %meta.upload_id, sealed = meta.sealed, "session meta saved");
            Ok(())
        })
    }

    fn load_meta<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Option<SessionMeta>> {
        Box::pin(async move {
            let path = self.session_dir(upload_id)?.join(META_FILE);
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.session_dir(upload_id)?;
            tokio::fs::create_dir_all(&dir).await?;
            write_atomic(&dir, &chunk_file_name(index), data).await?;
            trace!(upload_id, index, len = data.len(), "chunk stored");
            Ok(())
        })
    }

    fn received<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Vec<u32>> {
        Box::pin(async move {
            let dir = self.session_dir(upload_id)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };
            let mut indices = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_file_name) {
                    indices.push(index);
                }
            }
            indices.sort_unstable();
            Ok(indices)
        })
    }

    fn read_chunk<'a>(&'a self, upload_id: &'a str, index: u32) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.session_dir(upload_id)?.join(chunk_file_name(index));
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(data),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::ChunkNotFound {
                    upload_id: upload_id.to_string(),
                    index,
                }),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.session_dir(upload_id)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!(upload_id, "session area removed");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&self.root).await?;
            let mut ids = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if validate_upload_id(name).is_ok() {
                        ids.push(name.to_string());
                    }
                }
            }
            ids.sort();
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FinalizeProgress;
    use chrono::Utc;
    use tempfile::TempDir;

    fn meta(id: &str) -> SessionMeta {
        let now = Utc::now();
        SessionMeta {
            upload_id: id.into(),
            owner_id: "alice".into(),
            file_name: "a.bin".into(),
            mime_type: "application/octet-stream".into(),
            total_size: 12,
            total_chunks: 3,
            chunk_size: 5,
            folder_id: None,
            created_at: now,
            last_activity: now,
            sealed: false,
            finalize: FinalizeProgress::default(),
        }
    }

    #[tokio::test]
    async fn meta_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();

        assert!(store.load_meta("u1").await.unwrap().is_none());
        let m = meta("u1");
        store.save_meta(&m).await.unwrap();
        assert_eq!(store.load_meta("u1").await.unwrap(), Some(m));
        assert!(dir.path().join("u1").join("meta.json").exists());
    }

    #[tokio::test]
    async fn put_overwrites_and_received_is_sorted() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();

        store.put_chunk("u1", 2, b"cc").await.unwrap();
        store.put_chunk("u1", 0, b"aaaaa").await.unwrap();
        store.put_chunk("u1", 0, b"AAAAA").await.unwrap();

        assert_eq!(store.received("u1").await.unwrap(), vec![0, 2]);
        assert_eq!(store.read_chunk("u1", 0).await.unwrap(), b"AAAAA");
        assert_eq!(store.read_chunk("u1", 2).await.unwrap(), b"cc");
    }

    #[tokio::test]
    async fn temp_files_are_not_counted() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();
        store.put_chunk("u1", 1, b"x").await.unwrap();
        std::fs::write(dir.path().join("u1").join(".chunk_0.abc.tmp"), b"partial").unwrap();

        assert_eq!(store.received("u1").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn received_of_unknown_session_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();
        assert!(store.received("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_missing_chunk() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();
        store.save_meta(&meta("u1")).await.unwrap();
        assert!(matches!(
            store.read_chunk("u1", 4).await,
            Err(StoreError::ChunkNotFound { index: 4, .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();
        store.save_meta(&meta("u1")).await.unwrap();
        store.put_chunk("u1", 0, b"a").await.unwrap();

        store.delete("u1").await.unwrap();
        store.delete("u1").await.unwrap();
        assert!(store.load_meta("u1").await.unwrap().is_none());
        assert!(!dir.path().join("u1").exists());
    }

    #[tokio::test]
    async fn list_returns_session_dirs() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).await.unwrap();
        store.save_meta(&meta("b")).await.unwrap();
        store.put_chunk("a", 0, b"x").await.unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn rejects_traversal_ids() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path().join("chunks")).await.unwrap();
        assert!(matches!(
            store.put_chunk("../escape", 0, b"x").await,
            Err(StoreError::InvalidId(_))
        ));
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn concurrent_writes_to_distinct_indices() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FsChunkStore::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put_chunk("u1", i, &[i as u8; 64]).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(
            store.received("u1").await.unwrap(),
            (0..16).collect::<Vec<_>>()
        );
    }
}
