use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{ChunkLayout, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies `data` against a hex SHA-256 digest. An empty `expected`
/// skips verification.
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), TransferError> {
    if expected.is_empty() || checksum_bytes(data).eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch)
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Random-access reader returning whole chunks of a file by index.
///
/// Reads are blocking; async callers should wrap them in
/// `tokio::task::spawn_blocking`.
pub struct ChunkReader {
    file: std::fs::File,
    layout: ChunkLayout,
}

impl ChunkReader {
    /// Opens `path` and lays it out in `chunk_size` chunks.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let layout = ChunkLayout::new(file_size, chunk_size)?;
        Ok(Self { file, layout })
    }

    /// Opens `path`, failing if its size no longer matches `layout`.
    pub fn open_with_layout(path: &Path, layout: ChunkLayout) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let actual = file.metadata()?.len();
        if actual != layout.total_size() {
            return Err(TransferError::SizeMismatch {
                expected: layout.total_size(),
                actual,
            });
        }
        Ok(Self { file, layout })
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Reads chunk `index` in full.
    pub fn read_chunk(&mut self, index: u32) -> Result<Vec<u8>, TransferError> {
        let range = self.layout.chunk_range(index)?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.seek(SeekFrom::Start(range.start))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64);
    }

    #[test]
    fn verify_checksum_cases() {
        let good = checksum_bytes(b"data");
        assert!(verify_checksum(b"data", &good).is_ok());
        assert!(verify_checksum(b"data", &good.to_uppercase()).is_ok());
        assert!(verify_checksum(b"data", "").is_ok());
        assert!(matches!(
            verify_checksum(b"other", &good),
            Err(TransferError::ChecksumMismatch)
        ));
    }

    #[test]
    fn reads_chunks_in_any_order() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = ChunkReader::open(&path, 4).unwrap();
        assert_eq!(reader.layout().total_chunks(), 3);
        assert_eq!(reader.read_chunk(2).unwrap(), b"EE");
        assert_eq!(reader.read_chunk(0).unwrap(), b"AABB");
        assert_eq!(reader.read_chunk(1).unwrap(), b"CCDD");
        assert!(reader.read_chunk(3).is_err());
    }

    #[test]
    fn open_with_layout_detects_size_change() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");
        let layout = ChunkLayout::new(12, 4).unwrap();
        assert!(matches!(
            ChunkReader::open_with_layout(&path, layout),
            Err(TransferError::SizeMismatch {
                expected: 12,
                actual: 10
            })
        ));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = ChunkReader::open(&dir.path().join("nope"), 4);
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
