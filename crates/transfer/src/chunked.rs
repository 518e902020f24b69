use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Reads a file from a byte offset onward, in fixed-size chunks.
pub struct RangeReader {
    file: std::fs::File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl RangeReader {
    /// Opens `path` positioned at `offset`.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn open(path: &Path, offset: u64, chunk_size: usize) -> Result<Self, TransferError> {
        let mut file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        if offset > file_size {
            return Err(TransferError::OffsetOutOfRange {
                offset,
                size: file_size,
            });
        }
        file.seek(SeekFrom::Start(offset))?;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset,
            file_size,
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = std::cmp::min(remaining, self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        self.offset += n as u64;
        Ok(Some(buf))
    }

    /// Reads everything from the current offset to EOF.
    pub fn read_remaining(&mut self) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::with_capacity(self.remaining() as usize);
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }
}

/// Reads `[offset, EOF)` of the file at `path`.
pub fn read_range(path: &Path, offset: u64) -> Result<Vec<u8>, TransferError> {
    RangeReader::open(path, offset, 0)?.read_remaining()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn reads_all_chunks_from_start() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"AABBCCDDEE");

        let mut reader = RangeReader::open(&path, 0, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.remaining(), 10);

        assert_eq!(reader.next_chunk().unwrap().unwrap(), b"AABB");
        assert_eq!(reader.next_chunk().unwrap().unwrap(), b"CCDD");
        assert_eq!(reader.next_chunk().unwrap().unwrap(), b"EE");
        assert!(reader.next_chunk().unwrap().is_none());
        assert_eq!(reader.offset(), 10);
    }

    #[test]
    fn opens_at_offset() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"0123456789");

        let mut reader = RangeReader::open(&path, 6, 4).unwrap();
        assert_eq!(reader.offset(), 6);
        assert_eq!(reader.remaining(), 4);
        assert_eq!(reader.next_chunk().unwrap().unwrap(), b"6789");
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn read_range_returns_tail() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"0123456789");
        assert_eq!(read_range(&path, 5).unwrap(), b"56789");
        assert_eq!(read_range(&path, 0).unwrap(), b"0123456789");
        assert!(read_range(&path, 10).unwrap().is_empty());
    }

    #[test]
    fn offset_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"xyz");
        assert!(matches!(
            RangeReader::open(&path, 4, 0),
            Err(TransferError::OffsetOutOfRange { offset: 4, size: 3 })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = RangeReader::open(&dir.path().join("nope"), 0, 0);
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
