//! Storage Folder: lazy listing and batch operations over a prefix.
//!
//! Batch operations never stop at the first failing child. They run to the
//! end and return one [`BatchReport`]; if any child failed the report comes
//! back inside [`StorageError::PartialBatch`] and the successful children
//! stay committed.

use futures::Stream;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, instrument};

use crate::backend::{Backend, Cursor};
use crate::error::{BatchReport, Result, StorageError};
use crate::file::StorageFile;
use crate::identifier::Identifier;
use crate::resolver::Resolver;
use crate::traits::Entry;
use crate::transfer::{Transfer, TransferMode, TransferOptions};

/// Single-use, page-by-page enumeration of a folder.
///
/// Entries are fetched one backend page at a time. A page that fails
/// transiently is re-fetched from the same cursor position. The sequence is
/// not restartable; call [`StorageFolder::list`] again for a fresh one.
#[derive(Debug)]
pub struct Listing {
    cursor: Cursor,
    page_size: usize,
    buffered: VecDeque<Entry>,
}

impl Listing {
    /// Next entry, or `None` once the folder is exhausted.
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            if self.cursor.is_exhausted() {
                return Ok(None);
            }
            let page = self.cursor.next_page(self.page_size).await?;
            self.buffered.extend(page);
        }
    }

    /// Drain the remaining entries.
    pub async fn collect_all(mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Entry>> {
        futures::stream::try_unfold(self, |mut listing| async move {
            let next = listing.next().await?;
            Ok::<_, StorageError>(next.map(|entry| (entry, listing)))
        })
    }
}

/// A folder (prefix) on any backend.
#[derive(Debug, Clone)]
pub struct StorageFolder {
    id: Identifier,
    backend: Backend,
    resolver: Resolver,
}

impl StorageFolder {
    /// Resolve `uri` with the process-wide resolver. Performs no I/O.
    pub fn new(uri: &str) -> Result<Self> {
        Self::with_resolver(uri, &Resolver::global())
    }

    pub fn with_resolver(uri: &str, resolver: &Resolver) -> Result<Self> {
        Self::from_identifier(Identifier::parse(uri)?, resolver)
    }

    pub fn from_identifier(id: Identifier, resolver: &Resolver) -> Result<Self> {
        let backend = resolver.resolve_backend(&id)?;
        Ok(Self {
            id: id.as_folder(),
            backend,
            resolver: resolver.clone(),
        })
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Enumerate children. Recursive listings yield every descendant file
    /// and each intermediate folder once.
    pub fn list(&self, recursive: bool) -> Listing {
        Listing {
            cursor: self.backend.cursor(self.id.clone(), recursive),
            page_size: self.resolver.config().list_page_size.max(1),
            buffered: VecDeque::new(),
        }
    }

    /// Direct child files.
    pub async fn files(&self) -> Result<Vec<StorageFile>> {
        let mut listing = self.list(false);
        let mut files = Vec::new();
        while let Some(entry) = listing.next().await? {
            if entry.is_file() {
                files.push(self.file_at(entry.id)?);
            }
        }
        Ok(files)
    }

    /// Direct child folders.
    pub async fn folders(&self) -> Result<Vec<StorageFolder>> {
        let mut listing = self.list(false);
        let mut folders = Vec::new();
        while let Some(entry) = listing.next().await? {
            if entry.is_folder() {
                folders.push(self.folder_at(entry.id));
            }
        }
        Ok(folders)
    }

    /// Direct child files whose name starts with `prefix`.
    pub async fn filter_files(&self, prefix: &str) -> Result<Vec<StorageFile>> {
        let mut listing = self.list(false);
        let mut files = Vec::new();
        while let Some(entry) = listing.next().await? {
            if entry.is_file() && entry.id.name().starts_with(prefix) {
                files.push(self.file_at(entry.id)?);
            }
        }
        Ok(files)
    }

    /// File at `name` below this folder. No I/O.
    pub fn file(&self, name: &str) -> Result<StorageFile> {
        self.file_at(self.id.join(name))
    }

    /// Sub-folder at `name` below this folder. No I/O.
    pub fn folder(&self, name: &str) -> StorageFolder {
        self.folder_at(self.id.join(name))
    }

    fn file_at(&self, id: Identifier) -> Result<StorageFile> {
        StorageFile::from_parts(id, self.backend.clone(), self.resolver.clone())
    }

    fn folder_at(&self, id: Identifier) -> StorageFolder {
        StorageFolder {
            id: id.as_folder(),
            backend: self.backend.clone(),
            resolver: self.resolver.clone(),
        }
    }

    /// Local: the directory exists. Object stores: any object has the prefix.
    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists(&self.id).await
    }

    /// Create the folder. Object stores have no folders; this is a no-op there.
    pub async fn create(&self) -> Result<()> {
        self.backend.create_folder(&self.id).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.list(false).next().await?.is_none())
    }

    /// Total size in bytes of every descendant file.
    pub async fn size(&self) -> Result<u64> {
        let mut listing = self.list(true);
        let mut total = 0;
        while let Some(entry) = listing.next().await? {
            total += entry.size.unwrap_or(0);
        }
        Ok(total)
    }

    /// Copy every descendant file under `dest`.
    ///
    /// With `contents_only` the children land directly in `dest`; otherwise
    /// they land in `dest/NAME/`.
    pub async fn copy_to(&self, dest: &Identifier, contents_only: bool) -> Result<BatchReport> {
        let options = TransferOptions::from_config(self.resolver.config());
        self.transfer_all(dest, contents_only, TransferMode::Copy, &options).await
    }

    pub async fn copy_to_with(
        &self,
        dest: &Identifier,
        contents_only: bool,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        self.transfer_all(dest, contents_only, TransferMode::Copy, options).await
    }

    /// Move every descendant file under `dest`, then drop emptied local
    /// directories.
    pub async fn move_to(&self, dest: &Identifier, contents_only: bool) -> Result<BatchReport> {
        let options = TransferOptions::from_config(self.resolver.config());
        self.transfer_all(dest, contents_only, TransferMode::Move, &options).await
    }

    pub async fn move_to_with(
        &self,
        dest: &Identifier,
        contents_only: bool,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        self.transfer_all(dest, contents_only, TransferMode::Move, options).await
    }

    /// Delete every descendant file and the folder itself.
    pub async fn delete(&self) -> Result<BatchReport> {
        self.remove_all(true).await
    }

    /// Delete every descendant file but keep the folder.
    pub async fn empty(&self) -> Result<BatchReport> {
        self.remove_all(false).await
    }

    /// Enumerate fully before mutating, so the operation never observes its
    /// own writes.
    async fn snapshot(&self) -> Result<(Vec<Identifier>, Vec<Identifier>)> {
        let mut files = Vec::new();
        let mut folders = Vec::new();
        for entry in self.list(true).collect_all().await? {
            if entry.is_file() {
                files.push(entry.id);
            } else {
                folders.push(entry.id);
            }
        }
        Ok((files, folders))
    }

    #[instrument(skip(self), fields(path = %self.id))]
    async fn remove_all(&self, include_root: bool) -> Result<BatchReport> {
        let operation = if include_root { "delete" } else { "empty" };
        let (files, mut folders) = self.snapshot().await?;
        debug!(files = files.len(), "{} folder", operation);

        let mut report = BatchReport::new(operation);
        let outcomes = self.backend.delete_many(&files).await;
        for (file, outcome) in files.iter().zip(outcomes) {
            report.record(file.to_string(), outcome);
        }

        if include_root {
            folders.push(self.id.clone());
        }
        self.backend.prune_empty_folders(folders).await;
        report.into_result()
    }

    #[instrument(skip(self, options), fields(path = %self.id, to = %dest, mode = ?mode))]
    async fn transfer_all(
        &self,
        dest: &Identifier,
        contents_only: bool,
        mode: TransferMode,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        let target = if contents_only || self.id.segments().is_empty() {
            dest.as_folder()
        } else {
            dest.as_folder().child_of(&[self.id.name().to_string()], true)
        };
        let (files, mut folders) = self.snapshot().await?;
        debug!(files = files.len(), target = %target, "transferring folder");

        let operation = match mode {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        };
        let mut report = BatchReport::new(operation);
        for file in files {
            if options.cancel.is_cancelled() {
                return Err(StorageError::Cancelled(format!(
                    "{} of {} after {} file(s)",
                    operation,
                    self.id,
                    report.total()
                )));
            }
            let Some(relative) = file.relative_to(&self.id) else {
                continue;
            };
            let destination = target.child_of(relative, false);
            let mut transfer = Transfer::new(file.clone(), destination, mode);
            let outcome = transfer.run(&self.resolver, options).await;
            report.record(file.to_string(), outcome);
        }

        if mode == TransferMode::Move {
            if !contents_only {
                folders.push(self.id.clone());
            }
            self.backend.prune_empty_folders(folders).await;
        }
        report.into_result()
    }
}

impl fmt::Display for StorageFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
