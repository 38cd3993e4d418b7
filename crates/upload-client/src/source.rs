//! Where the bytes of an upload come from.

use std::path::PathBuf;
use std::sync::Arc;

use stowage_transfer::{ChunkLayout, ChunkReader, TransferError};

use crate::error::ClientError;

/// The content of one upload task.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A file on disk, read chunk by chunk.
    File(PathBuf),
    /// Bytes already in memory.
    Bytes(Arc<[u8]>),
}

impl UploadSource {
    /// Current size of the source in bytes.
    pub async fn len(&self) -> Result<u64, ClientError> {
        match self {
            Self::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
            Self::Bytes(bytes) => Ok(bytes.len() as u64),
        }
    }

    /// Reads chunk `index` of `layout`.
    ///
    /// Fails with a size mismatch if a file source changed since the
    /// layout was computed.
    pub async fn read_chunk(&self, layout: ChunkLayout, index: u32) -> Result<Vec<u8>, ClientError> {
        match self {
            Self::File(path) => {
                let path = path.clone();
                let chunk = tokio::task::spawn_blocking(move || {
                    ChunkReader::open_with_layout(&path, layout)?.read_chunk(index)
                })
                .await
                .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;
                Ok(chunk)
            }
            Self::Bytes(bytes) => {
                let range = layout.chunk_range(index)?;
                if layout.total_size() != bytes.len() as u64 {
                    return Err(TransferError::SizeMismatch {
                        expected: layout.total_size(),
                        actual: bytes.len() as u64,
                    }
                    .into());
                }
                Ok(bytes[range.start as usize..range.end as usize].to_vec())
            }
        }
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn file_and_bytes_agree() {
        let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&content).unwrap();

        let file = UploadSource::File(tmp.path().to_path_buf());
        let mem = UploadSource::from(content.clone());
        assert_eq!(file.len().await.unwrap(), 1000);
        assert_eq!(mem.len().await.unwrap(), 1000);

        let layout = ChunkLayout::new(1000, 300).unwrap();
        for index in 0..layout.total_chunks() {
            let a = file.read_chunk(layout, index).await.unwrap();
            let b = mem.read_chunk(layout, index).await.unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(mem.read_chunk(layout, 3).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn changed_file_is_detected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let layout = ChunkLayout::new(8, 4).unwrap();

        let err = UploadSource::File(tmp.path().to_path_buf())
            .read_chunk(layout, 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transfer(TransferError::SizeMismatch { expected: 8, actual: 10 })
        ));
    }
}
