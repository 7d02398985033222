//! Unpacker trait and error types.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use thiserror::Error;

/// Seekable byte source an archive is read from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not an archive: {0}")]
    NotAnArchive(String),

    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    #[error("Unsupported archive feature: {0}")]
    Unsupported(String),

    #[error("Entry escapes destination: {0}")]
    UnsafePath(String),

    #[error("Checksum mismatch for {name}: expected {expected:08X}, got {actual:08X}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
}

/// Unpacks an archive into a directory.
///
/// Implementations must not write outside `dest`.
pub trait ArchiveUnpacker: Send + Sync {
    /// Unpack every entry of `archive` into `dest`, returning the number of
    /// files written.
    fn unpack(&self, archive: &mut dyn ReadSeek, dest: &Path) -> Result<usize, UnpackError>;

    /// Open `path` and unpack it.
    fn unpack_file(&self, path: &Path, dest: &Path) -> Result<usize, UnpackError> {
        let mut reader = BufReader::new(File::open(path)?);
        self.unpack(&mut reader, dest)
    }
}

impl<T: ArchiveUnpacker + ?Sized> ArchiveUnpacker for Box<T> {
    fn unpack(&self, archive: &mut dyn ReadSeek, dest: &Path) -> Result<usize, UnpackError> {
        (**self).unpack(archive, dest)
    }
}
