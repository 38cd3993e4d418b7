use std::ops::Range;

use crate::TransferError;

/// How a file of `total_size` bytes divides into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    total_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkLayout {
    /// Computes the layout. `chunk_size` must be non-zero and the chunk
    /// count must fit in a `u32` index.
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        let chunks = total_size.div_ceil(chunk_size);
        let total_chunks =
            u32::try_from(chunks).map_err(|_| TransferError::TooManyChunks(chunks))?;
        Ok(Self {
            total_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(total_size / chunk_size)`; zero for an empty file.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range covered by chunk `index`.
    pub fn chunk_range(&self, index: u32) -> Result<Range<u64>, TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::IndexOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        Ok(start..end)
    }

    /// Length of chunk `index`. The last chunk holds the remainder.
    pub fn chunk_len(&self, index: u32) -> Result<u64, TransferError> {
        self.chunk_range(index).map(|r| r.end - r.start)
    }

    /// Total bytes covered by the given chunk indices. Out-of-range indices
    /// contribute nothing.
    pub fn bytes_in<'a>(&self, indices: impl IntoIterator<Item = &'a u32>) -> u64 {
        indices
            .into_iter()
            .filter_map(|&i| self.chunk_len(i).ok())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn twelve_mb_in_five_mb_chunks() {
        let layout = ChunkLayout::new(12 * MB, 5 * MB).unwrap();
        assert_eq!(layout.total_chunks(), 3);
        assert_eq!(layout.chunk_len(0).unwrap(), 5 * MB);
        assert_eq!(layout.chunk_len(1).unwrap(), 5 * MB);
        assert_eq!(layout.chunk_len(2).unwrap(), 2 * MB);
        assert_eq!(layout.chunk_range(2).unwrap(), 10 * MB..12 * MB);
    }

    #[test]
    fn ceil_and_last_chunk_hold_for_many_sizes() {
        for chunk_size in [1u64, 3, 7, 64, 1000] {
            for total_size in [0u64, 1, 2, 6, 7, 8, 63, 64, 65, 999, 1000, 1001, 4096] {
                let layout = ChunkLayout::new(total_size, chunk_size).unwrap();
                let n = u64::from(layout.total_chunks());
                assert_eq!(n, total_size.div_ceil(chunk_size));
                if n > 0 {
                    let last = layout.chunk_len(layout.total_chunks() - 1).unwrap();
                    assert_eq!(last, total_size - chunk_size * (n - 1));
                }
                let all: Vec<u32> = (0..layout.total_chunks()).collect();
                assert_eq!(layout.bytes_in(&all), total_size);
            }
        }
    }

    #[test]
    fn exact_multiple_has_full_last_chunk() {
        let layout = ChunkLayout::new(10, 5).unwrap();
        assert_eq!(layout.total_chunks(), 2);
        assert_eq!(layout.chunk_len(1).unwrap(), 5);
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let layout = ChunkLayout::new(0, 5).unwrap();
        assert_eq!(layout.total_chunks(), 0);
        assert!(layout.chunk_range(0).is_err());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkLayout::new(10, 0),
            Err(TransferError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn index_out_of_range() {
        let layout = ChunkLayout::new(10, 4).unwrap();
        assert!(matches!(
            layout.chunk_len(3),
            Err(TransferError::IndexOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn too_many_chunks_rejected() {
        assert!(matches!(
            ChunkLayout::new(u64::MAX, 1),
            Err(TransferError::TooManyChunks(_))
        ));
    }

    #[test]
    fn bytes_in_subset() {
        let layout = ChunkLayout::new(12, 5).unwrap();
        assert_eq!(layout.bytes_in(&[0, 2]), 7);
        assert_eq!(layout.bytes_in(&[9]), 0);
    }
}
