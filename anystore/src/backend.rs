//! Closed set of storage backends behind one interface.
//!
//! The resolver picks a variant once per identifier; every file and folder
//! operation then dispatches through [`Backend`]. Stream handles are enums
//! over the per-backend reader and writer types.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;

use crate::error::Result;
use crate::identifier::Identifier;
use crate::local::{LocalBackend, LocalCursor, LocalReader, LocalWriter};
use crate::object::{ObjectBackend, ObjectCursor, ObjectReader, ObjectWriter};
use crate::traits::{Checksum, Entry, ObjectMeta, ReadStream, WriteStream};

/// A resolved storage backend.
#[derive(Debug, Clone)]
pub enum Backend {
    Local(LocalBackend),
    /// GCS or S3 bucket
    Object(ObjectBackend),
}

impl Backend {
    pub fn name(&self) -> &str {
        match self {
            Backend::Local(_) => "local",
            Backend::Object(b) => b.scheme().as_str(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Backend::Local(_))
    }

    pub async fn open_read(&self, id: &Identifier) -> Result<Reader> {
        match self {
            Backend::Local(b) => b.open_read(id).await.map(Reader::Local),
            Backend::Object(b) => b.open_read(id).await.map(Reader::Object),
        }
    }

    pub async fn open_write(&self, id: &Identifier) -> Result<Writer> {
        match self {
            Backend::Local(b) => b.open_write(id).await.map(Writer::Local),
            Backend::Object(b) => b.open_write(id).await.map(Writer::Object),
        }
    }

    pub async fn exists(&self, id: &Identifier) -> Result<bool> {
        match self {
            Backend::Local(b) => b.exists(id).await,
            Backend::Object(b) => b.exists(id).await,
        }
    }

    pub async fn delete(&self, id: &Identifier) -> Result<()> {
        match self {
            Backend::Local(b) => b.delete(id).await,
            Backend::Object(b) => b.delete(id).await,
        }
    }

    /// Delete many files of this backend, one outcome per identifier.
    ///
    /// Object stores batch the keys into bulk requests; local files are
    /// removed one by one.
    pub async fn delete_many(&self, ids: &[Identifier]) -> Vec<Result<()>> {
        match self {
            Backend::Local(b) => {
                let mut outcomes = Vec::with_capacity(ids.len());
                for id in ids {
                    outcomes.push(b.delete(id).await);
                }
                outcomes
            }
            Backend::Object(b) => b.delete_many(ids).await,
        }
    }

    pub async fn head(&self, id: &Identifier) -> Result<ObjectMeta> {
        match self {
            Backend::Local(b) => b.head(id).await,
            Backend::Object(b) => b.head(id).await,
        }
    }

    pub async fn checksum(&self, id: &Identifier) -> Result<Checksum> {
        match self {
            Backend::Local(b) => b.checksum(id).await,
            Backend::Object(b) => b.checksum(id).await,
        }
    }

    /// Backend-native copy. Both identifiers must live in this store.
    pub async fn copy(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        match self {
            Backend::Local(b) => b.copy(from, to).await,
            Backend::Object(b) => b.copy(from, to).await,
        }
    }

    /// Backend-native rename. Both identifiers must live in this store.
    pub async fn rename(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        match self {
            Backend::Local(b) => b.rename(from, to).await,
            Backend::Object(b) => b.rename(from, to).await,
        }
    }

    /// Create a folder. Object stores have no folders, so this is a no-op there.
    pub async fn create_folder(&self, id: &Identifier) -> Result<()> {
        match self {
            Backend::Local(b) => b.create_dir(id).await,
            Backend::Object(_) => Ok(()),
        }
    }

    /// Drop directories left empty by a batch operation.
    pub(crate) async fn prune_empty_folders(&self, folders: Vec<Identifier>) {
        if let Backend::Local(b) = self {
            b.prune_empty_dirs(folders).await;
        }
    }

    pub(crate) fn cursor(&self, root: Identifier, recursive: bool) -> Cursor {
        match self {
            Backend::Local(_) => Cursor::Local(LocalCursor::new(root, recursive)),
            Backend::Object(b) => Cursor::Object(b.cursor(root, recursive)),
        }
    }
}

/// Read handle of an open file.
#[derive(Debug)]
pub enum Reader {
    Local(LocalReader),
    Object(ObjectReader),
}

#[async_trait]
impl ReadStream for Reader {
    async fn read(&mut self, n: usize) -> Result<Bytes> {
        match self {
            Reader::Local(r) => r.read(n).await,
            Reader::Object(r) => r.read(n).await,
        }
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            Reader::Local(r) => r.seek(pos).await,
            Reader::Object(r) => r.seek(pos).await,
        }
    }

    fn tell(&self) -> u64 {
        match self {
            Reader::Local(r) => r.tell(),
            Reader::Object(r) => r.tell(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Reader::Local(r) => r.close().await,
            Reader::Object(r) => r.close().await,
        }
    }
}

/// Write handle of an open file.
#[derive(Debug)]
pub enum Writer {
    Local(LocalWriter),
    Object(ObjectWriter),
}

#[async_trait]
impl WriteStream for Writer {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            Writer::Local(w) => w.write(data).await,
            Writer::Object(w) => w.write(data).await,
        }
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            Writer::Local(w) => w.seek(pos).await,
            Writer::Object(w) => w.seek(pos).await,
        }
    }

    fn tell(&self) -> u64 {
        match self {
            Writer::Local(w) => w.tell(),
            Writer::Object(w) => w.tell(),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Writer::Local(w) => w.flush().await,
            Writer::Object(w) => w.flush().await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            Writer::Local(w) => w.commit().await,
            Writer::Object(w) => w.commit().await,
        }
    }

    async fn abort(&mut self) -> Result<()> {
        match self {
            Writer::Local(w) => w.abort().await,
            Writer::Object(w) => w.abort().await,
        }
    }
}

/// Listing cursor over either backend.
#[derive(Debug)]
pub(crate) enum Cursor {
    Local(LocalCursor),
    Object(ObjectCursor),
}

impl Cursor {
    pub(crate) fn is_exhausted(&self) -> bool {
        match self {
            Cursor::Local(c) => c.is_exhausted(),
            Cursor::Object(c) => c.is_exhausted(),
        }
    }

    pub(crate) async fn next_page(&mut self, page_size: usize) -> Result<Vec<Entry>> {
        match self {
            Cursor::Local(c) => c.next_page(page_size).await,
            Cursor::Object(c) => c.next_page(page_size).await,
        }
    }
}
