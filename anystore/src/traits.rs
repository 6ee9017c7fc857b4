//! Core stream trait definitions.
//!
//! Every backend exposes the same stream capability set through two traits:
//! [`ReadStream`] for files opened for reading and [`WriteStream`] for files
//! opened for writing. Handles are exclusively owned by the
//! [`StorageFile`](crate::StorageFile) that opened them.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::SeekFrom;

use crate::error::{Result, StorageError};
use crate::identifier::Identifier;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Full identifier of the object
    pub id: Identifier,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub last_modified: Option<DateTime<Utc>>,
    /// ETag if available
    pub etag: Option<String>,
}

/// Kind of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Folder,
}

/// One child discovered while listing a folder.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: Identifier,
    pub kind: EntryKind,
    /// Size in bytes, for files
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Entry {
    pub(crate) fn file(id: Identifier, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            kind: EntryKind::File,
            size: Some(size),
            last_modified,
        }
    }

    pub(crate) fn folder(id: Identifier) -> Self {
        Self {
            id,
            kind: EntryKind::Folder,
            size: None,
            last_modified: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// Content checksum reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// Entity tag assigned by an object store (quotes stripped)
    ETag(String),
    /// Hex-encoded SHA-256 digest computed from the content
    Sha256(String),
}

impl Checksum {
    pub fn value(&self) -> &str {
        match self {
            Checksum::ETag(v) | Checksum::Sha256(v) => v,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::ETag(v) => write!(f, "etag:{}", v),
            Checksum::Sha256(v) => write!(f, "sha256:{}", v),
        }
    }
}

/// Mode a [`StorageFile`](crate::StorageFile) is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Truncating write; the content is committed on close
    Write,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => write!(f, "read"),
            OpenMode::Write => write!(f, "write"),
        }
    }
}

/// Resolve a seek request against the current offset and object size.
///
/// Negative results are rejected, as the OS rejects them.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(n) => return Ok(n),
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => size as i128 + delta as i128,
    };
    u64::try_from(target).map_err(|_| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid seek to a negative position ({})", target),
        ))
    })
}

/// Read side of an open file.
#[async_trait]
pub trait ReadStream: Send {
    /// Read up to `n` bytes. Returns fewer only at end of file.
    async fn read(&mut self, n: usize) -> Result<Bytes>;

    /// Move the read position, returning the new absolute offset.
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current read position.
    fn tell(&self) -> u64;

    /// Release the underlying handle.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Write side of an open file.
#[async_trait]
pub trait WriteStream: Send {
    /// Append bytes at the current position, returning the count written.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Move the write position, where the backend supports it.
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current write position.
    fn tell(&self) -> u64;

    /// Push buffered bytes towards the backend without committing.
    async fn flush(&mut self) -> Result<()>;

    /// Commit everything written. This is the durability point.
    async fn commit(&mut self) -> Result<()>;

    /// Release the handle without committing.
    async fn abort(&mut self) -> Result<()>;
}
