//! Storage File: one identifier plus an open/closed stream state machine.
//!
//! ```text
//!            open(Read)              close()/release()
//!   Closed ───────────────▶ OpenRead ────────────────▶ Closed
//!     │                                                   ▲
//!     │      open(Write)             close() commits      │
//!     └─────────────────────▶ OpenWrite ──────────────────┘
//! ```
//!
//! Stream operations are valid only in the matching open state. Metadata
//! operations (`exists`, `size`, `checksum`, ...) need no prior `open`.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::fmt;
use std::io::SeekFrom;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, instrument, warn};

use crate::backend::{Backend, Reader, Writer};
use crate::error::{Result, StorageError};
use crate::identifier::Identifier;
use crate::resolver::Resolver;
use crate::traits::{Checksum, ObjectMeta, OpenMode, ReadStream, WriteStream};
use crate::transfer::{Transfer, TransferMode, TransferOptions};

/// Leading bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

enum OpenState {
    Closed,
    Read(Reader),
    Write(Writer),
}

impl fmt::Debug for OpenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenState::Closed => write!(f, "Closed"),
            OpenState::Read(r) => f.debug_tuple("OpenRead").field(r).finish(),
            OpenState::Write(w) => f.debug_tuple("OpenWrite").field(w).finish(),
        }
    }
}

/// A file on any backend.
#[derive(Debug)]
pub struct StorageFile {
    id: Identifier,
    backend: Backend,
    resolver: Resolver,
    state: OpenState,
    meta: Option<ObjectMeta>,
}

impl StorageFile {
    /// Resolve `uri` with the process-wide resolver. Performs no I/O.
    pub fn new(uri: &str) -> Result<Self> {
        Self::with_resolver(uri, &Resolver::global())
    }

    pub fn with_resolver(uri: &str, resolver: &Resolver) -> Result<Self> {
        Self::from_identifier(Identifier::parse(uri)?, resolver)
    }

    pub fn from_identifier(id: Identifier, resolver: &Resolver) -> Result<Self> {
        let backend = resolver.resolve_backend(&id)?;
        Self::from_parts(id, backend, resolver.clone())
    }

    pub(crate) fn from_parts(id: Identifier, backend: Backend, resolver: Resolver) -> Result<Self> {
        let id = id.as_file();
        if id.is_folder() {
            return Err(StorageError::MalformedIdentifier(format!(
                "{} names a folder, not a file",
                id
            )));
        }
        Ok(Self {
            id,
            backend,
            resolver,
            state: OpenState::Closed,
            meta: None,
        })
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Current open mode, or `None` when closed.
    pub fn mode(&self) -> Option<OpenMode> {
        match self.state {
            OpenState::Closed => None,
            OpenState::Read(_) => Some(OpenMode::Read),
            OpenState::Write(_) => Some(OpenMode::Write),
        }
    }

    pub fn is_open(&self) -> bool {
        self.mode().is_some()
    }

    fn state_error(&self, operation: &str, wanted: &str) -> StorageError {
        let current = match self.mode() {
            Some(mode) => format!("open for {}", mode),
            None => "closed".to_string(),
        };
        StorageError::State(format!(
            "cannot {} {}: file is {}, {} required",
            operation, self.id, current, wanted
        ))
    }

    /// Open a stream. Opening for write truncates.
    #[instrument(skip(self), fields(path = %self.id))]
    pub async fn open(&mut self, mode: OpenMode) -> Result<()> {
        if let Some(current) = self.mode() {
            return Err(StorageError::State(format!(
                "{} is already open for {}",
                self.id, current
            )));
        }

        self.state = match mode {
            OpenMode::Read => OpenState::Read(self.backend.open_read(&self.id).await?),
            OpenMode::Write => {
                self.meta = None;
                OpenState::Write(self.backend.open_write(&self.id).await?)
            }
        };
        debug!("opened for {}", mode);
        Ok(())
    }

    /// Read up to `n` bytes; an empty result means end of file.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        match &mut self.state {
            OpenState::Read(reader) => reader.read(n).await,
            _ => Err(self.state_error("read", "open for read")),
        }
    }

    /// Read from the current position to the end of the file.
    ///
    /// A closed file is opened, read and closed again.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let opened_here = !self.is_open();
        if opened_here {
            self.open(OpenMode::Read).await?;
        }

        let chunk_size = self.resolver.config().chunk_size;
        let mut out = BytesMut::new();
        let result = loop {
            match self.read(chunk_size).await {
                Ok(chunk) if chunk.is_empty() => break Ok(()),
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => break Err(e),
            }
        };

        if opened_here {
            self.close().await?;
        }
        result.map(|()| out.freeze())
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.state {
            OpenState::Write(writer) => writer.write(data).await,
            _ => Err(self.state_error("write", "open for write")),
        }
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match &mut self.state {
            OpenState::Read(reader) => reader.seek(pos).await,
            OpenState::Write(writer) => writer.seek(pos).await,
            OpenState::Closed => Err(self.state_error("seek", "an open stream")),
        }
    }

    pub fn tell(&self) -> Result<u64> {
        match &self.state {
            OpenState::Read(reader) => Ok(reader.tell()),
            OpenState::Write(writer) => Ok(writer.tell()),
            OpenState::Closed => Err(self.state_error("tell", "an open stream")),
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        match &mut self.state {
            OpenState::Write(writer) => writer.flush().await,
            _ => Err(self.state_error("flush", "open for write")),
        }
    }

    /// Commit pending writes and return to `Closed`. Closing a closed file
    /// is a no-op.
    ///
    /// The handle is released even when the commit fails.
    #[instrument(skip(self), fields(path = %self.id))]
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, OpenState::Closed) {
            OpenState::Closed => Ok(()),
            OpenState::Read(mut reader) => reader.close().await,
            OpenState::Write(mut writer) => {
                self.meta = None;
                writer.commit().await?;
                debug!(size = writer.tell(), "committed");
                Ok(())
            }
        }
    }

    /// Return to `Closed` without committing pending writes.
    pub async fn release(&mut self) {
        match std::mem::replace(&mut self.state, OpenState::Closed) {
            OpenState::Closed => {}
            OpenState::Read(mut reader) => {
                if let Err(e) = reader.close().await {
                    warn!(path = %self.id, "error releasing reader: {}", e);
                }
            }
            OpenState::Write(mut writer) => {
                self.meta = None;
                if let Err(e) = writer.abort().await {
                    warn!(path = %self.id, "error releasing writer: {}", e);
                }
            }
        }
    }

    /// Open and return a guard that closes via [`OpenFile::close`] and
    /// releases without committing when dropped.
    pub async fn open_scoped(&mut self, mode: OpenMode) -> Result<OpenFile<'_>> {
        self.open(mode).await?;
        Ok(OpenFile { file: self })
    }

    /// Open, run `f`, then commit on success or release on error.
    ///
    /// ```no_run
    /// # async fn example(file: &mut anystore::StorageFile) -> anystore::Result<()> {
    /// use anystore::OpenMode;
    ///
    /// let header = file
    ///     .scoped(OpenMode::Read, |f| Box::pin(async move { f.read(16).await }))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped<T, F>(&mut self, mode: OpenMode, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut StorageFile) -> BoxFuture<'a, Result<T>>,
    {
        self.open(mode).await?;
        match f(self).await {
            Ok(value) => {
                self.close().await?;
                Ok(value)
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }

    /// Replace the content in one step.
    #[instrument(skip(self, data), fields(path = %self.id, size = data.len()))]
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.open(OpenMode::Write).await?;
        if let Err(e) = self.write(data).await {
            self.release().await;
            return Err(e);
        }
        self.close().await
    }

    /// Write UTF-8 text. Appends when open for write; otherwise replaces
    /// the content in one step. An empty string does nothing.
    pub async fn write_string(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        match self.mode() {
            Some(OpenMode::Write) => self.write(text.as_bytes()).await.map(drop),
            Some(OpenMode::Read) => Err(self.state_error("write", "open for write")),
            None => self.write_all(text.as_bytes()).await,
        }
    }

    /// Whether the content starts with the gzip magic bytes.
    ///
    /// An open reader is restored to its position afterwards.
    pub async fn is_gz(&mut self) -> Result<bool> {
        let header = match self.mode() {
            Some(OpenMode::Read) => {
                let position = self.tell()?;
                self.seek(SeekFrom::Start(0)).await?;
                let header = self.read_up_to(GZIP_MAGIC.len()).await;
                self.seek(SeekFrom::Start(position)).await?;
                header?
            }
            Some(OpenMode::Write) => return Err(self.state_error("sniff", "closed or open for read")),
            None => {
                self.open(OpenMode::Read).await?;
                let header = self.read_up_to(GZIP_MAGIC.len()).await;
                self.close().await?;
                header?
            }
        };
        Ok(header[..] == GZIP_MAGIC)
    }

    /// Read until `n` bytes or end of file.
    async fn read_up_to(&mut self, n: usize) -> Result<BytesMut> {
        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let chunk = self.read(n - out.len()).await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists(&self.id).await
    }

    #[instrument(skip(self), fields(path = %self.id))]
    pub async fn delete(&mut self) -> Result<()> {
        self.meta = None;
        self.backend.delete(&self.id).await
    }

    /// Backend metadata, cached until the next write, delete or move.
    pub async fn metadata(&mut self) -> Result<ObjectMeta> {
        if let Some(meta) = &self.meta {
            return Ok(meta.clone());
        }
        let meta = self.backend.head(&self.id).await?;
        self.meta = Some(meta.clone());
        Ok(meta)
    }

    /// Drop cached metadata so the next query goes to the backend.
    pub fn refresh(&mut self) {
        self.meta = None;
    }

    pub async fn size(&mut self) -> Result<u64> {
        Ok(self.metadata().await?.size)
    }

    pub async fn last_modified(&mut self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.metadata().await?.last_modified)
    }

    pub async fn checksum(&self) -> Result<Checksum> {
        self.backend.checksum(&self.id).await
    }

    fn ensure_closed(&self, operation: &str) -> Result<()> {
        if self.is_open() {
            return Err(self.state_error(operation, "closed file"));
        }
        Ok(())
    }

    /// Copy to `dest`, natively when both live in the same store.
    pub async fn copy_to(&self, dest: &Identifier) -> Result<Transfer> {
        let options = TransferOptions::from_config(self.resolver.config());
        self.copy_to_with(dest, &options).await
    }

    pub async fn copy_to_with(&self, dest: &Identifier, options: &TransferOptions) -> Result<Transfer> {
        self.ensure_closed("copy")?;
        let mut transfer = Transfer::new(self.id.clone(), dest.as_file(), TransferMode::Copy);
        transfer.run(&self.resolver, options).await?;
        Ok(transfer)
    }

    /// Move to `dest`.
    ///
    /// Uses a native rename when source and destination share a store;
    /// otherwise copies then deletes the source. The fallback is not
    /// atomic: a crash between the two steps leaves both objects present.
    pub async fn move_to(&mut self, dest: &Identifier) -> Result<Transfer> {
        let options = TransferOptions::from_config(self.resolver.config());
        self.move_to_with(dest, &options).await
    }

    pub async fn move_to_with(&mut self, dest: &Identifier, options: &TransferOptions) -> Result<Transfer> {
        self.ensure_closed("move")?;
        self.meta = None;
        let mut transfer = Transfer::new(self.id.clone(), dest.as_file(), TransferMode::Move);
        transfer.run(&self.resolver, options).await?;
        Ok(transfer)
    }
}

impl StorageFile {
    /// Copy the content to a local path.
    pub async fn download(&self, to: impl AsRef<Path>) -> Result<Transfer> {
        let dest = local_identifier(to.as_ref())?;
        if !self.exists().await? {
            return Err(StorageError::NotFound(self.id.to_string()));
        }
        self.copy_to(&dest).await
    }

    /// Replace the content with a local file.
    #[instrument(skip(self, from), fields(path = %self.id))]
    pub async fn upload_from_file(&mut self, from: impl AsRef<Path>) -> Result<Transfer> {
        self.ensure_closed("upload")?;
        let source = local_identifier(from.as_ref())?;
        self.meta = None;
        let options = TransferOptions::from_config(self.resolver.config());
        let mut transfer = Transfer::new(source, self.id.clone(), TransferMode::Copy);
        transfer.run(&self.resolver, &options).await?;
        Ok(transfer)
    }
}

fn local_identifier(path: &Path) -> Result<Identifier> {
    let text = path.to_str().ok_or_else(|| {
        StorageError::MalformedIdentifier(format!("{} is not valid UTF-8", path.display()))
    })?;
    Ok(Identifier::local(text)?.as_file())
}

impl fmt::Display for StorageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Guard over an open [`StorageFile`].
///
/// Dropping the guard releases the handle without committing; call
/// [`OpenFile::close`] to commit.
#[derive(Debug)]
pub struct OpenFile<'a> {
    file: &'a mut StorageFile,
}

impl OpenFile<'_> {
    /// Commit and close.
    pub async fn close(self) -> Result<()> {
        self.file.close().await
    }

    /// Close without committing.
    pub async fn release(self) {
        self.file.release().await
    }
}

impl Deref for OpenFile<'_> {
    type Target = StorageFile;

    fn deref(&self) -> &StorageFile {
        self.file
    }
}

impl DerefMut for OpenFile<'_> {
    fn deref_mut(&mut self) -> &mut StorageFile {
        self.file
    }
}

impl Drop for OpenFile<'_> {
    fn drop(&mut self) {
        if self.file.is_open() {
            debug!(path = %self.file.id, "releasing uncommitted handle");
            // Object writers abort their upload on drop.
            self.file.state = OpenState::Closed;
        }
    }
}
