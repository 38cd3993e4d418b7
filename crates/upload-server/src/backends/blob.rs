use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::collaborators::{BackendError, BackendFuture, BlobStore, ByteStream};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Blob store keeping each blob as a file at `<root>/<key>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, BackendError> {
        stowage_transfer::validate_storage_key(key)
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        mut body: ByteStream<'a>,
        content_type: &'a str,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let path = self.blob_path(key)?;
            let parent = path.parent().unwrap_or(&self.root).to_path_buf();
            tokio::fs::create_dir_all(&parent).await?;
            let tmp = parent.join(format!(".blob.{}.tmp", uuid::Uuid::new_v4().simple()));

            let result: Result<u64, BackendError> = async {
                let mut file = tokio::fs::File::create(&tmp).await?;
                let mut written = 0u64;
                while let Some(piece) = body.next().await {
                    let piece = piece?;
                    file.write_all(&piece).await?;
                    written += piece.len() as u64;
                }
                file.sync_all().await?;
                drop(file);
                tokio::fs::rename(&tmp, &path).await?;
                Ok(written)
            }
            .await;

            match result {
                Ok(written) => {
                    debug!(key, content_type, bytes = written, "blob stored");
                    Ok(key.to_string())
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    Err(e)
                }
            }
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ByteStream<'static>> {
        Box::pin(async move {
            let path = self.blob_path(key)?;
            let file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(BackendError::BlobNotFound(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let stream = futures_util::stream::try_unfold(file, |mut file| async move {
                let mut buf = vec![0u8; READ_BUF_SIZE];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<_, BackendError>(None);
                }
                buf.truncate(n);
                Ok(Some((buf, file)))
            });
            Ok(stream.boxed())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let path = self.blob_path(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(key, "blob deleted");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
