//! Piece storage against a single backing file.
//!
//! The file lives under `<peerId>/<FileName>` and is created sparse at
//! its full size, so piece writes can land at `index * piece_size` in
//! any order. The last piece is short when the file size is not a
//! multiple of the piece size.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("piece {piece} has {got} bytes, expected {expected}")]
    PieceLengthMismatch {
        piece: u32,
        expected: usize,
        got: usize,
    },
}

/// Indexed read/write access to the pieces of the shared file.
///
/// One handle is shared by every link thread; seeks and transfers
/// serialize on an internal mutex.
pub struct PieceStore {
    file: Mutex<File>,
    file_size: u64,
    piece_size: u64,
    num_pieces: u32,
}

impl PieceStore {
    /// Opens (or sparse-creates) the backing file inside `dir`.
    pub fn open(
        dir: &Path,
        file_name: &str,
        file_size: u64,
        piece_size: u64,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if file.metadata()?.len() != file_size {
            file.set_len(file_size)?;
        }
        Ok(Self {
            file: Mutex::new(file),
            file_size,
            piece_size,
            num_pieces: file_size.div_ceil(piece_size) as u32,
        })
    }

    pub fn num_pieces(&self) -> u32 {
        self.num_pieces
    }

    /// Length in bytes of piece `index`; only the last piece is short.
    pub fn piece_len(&self, index: u32) -> usize {
        let start = u64::from(index) * self.piece_size;
        let remaining = self.file_size.saturating_sub(start);
        remaining.min(self.piece_size) as usize
    }

    pub fn read_piece(&self, index: u32) -> Result<Bytes, StorageError> {
        if index >= self.num_pieces {
            return Err(StorageError::InvalidPieceIndex(index));
        }
        let mut buf = vec![0u8; self.piece_len(index)];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(index) * self.piece_size))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    pub fn write_piece(&self, index: u32, data: &[u8]) -> Result<(), StorageError> {
        if index >= self.num_pieces {
            return Err(StorageError::InvalidPieceIndex(index));
        }
        let expected = self.piece_len(index);
        if data.len() != expected {
            return Err(StorageError::PieceLengthMismatch {
                piece: index,
                expected,
                got: data.len(),
            });
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(index) * self.piece_size))?;
        file.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> PieceStore {
        PieceStore::open(dir, "payload.bin", 10, 4).unwrap()
    }

    #[test]
    fn test_sparse_create_and_piece_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.num_pieces(), 3);
        assert_eq!(store.piece_len(0), 4);
        assert_eq!(store.piece_len(1), 4);
        assert_eq!(store.piece_len(2), 2);
        assert_eq!(fs::metadata(dir.path().join("payload.bin")).unwrap().len(), 10);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write_piece(1, b"abcd").unwrap();
        store.write_piece(2, b"xy").unwrap();
        assert_eq!(store.read_piece(1).unwrap().as_ref(), b"abcd");
        assert_eq!(store.read_piece(2).unwrap().as_ref(), b"xy");
        // Untouched pieces read back as the sparse zeros.
        assert_eq!(store.read_piece(0).unwrap().as_ref(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_bad_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(
            store.read_piece(3),
            Err(StorageError::InvalidPieceIndex(3))
        ));
        assert!(matches!(
            store.write_piece(9, b"abcd"),
            Err(StorageError::InvalidPieceIndex(9))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(
            store.write_piece(2, b"xyz"),
            Err(StorageError::PieceLengthMismatch { piece: 2, expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_existing_file_contents_survive_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store(dir.path());
            store.write_piece(0, b"seed").unwrap();
        }
        let reopened = store(dir.path());
        assert_eq!(reopened.read_piece(0).unwrap().as_ref(), b"seed");
    }
}
