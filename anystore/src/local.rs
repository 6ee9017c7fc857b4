//! Local filesystem backend.
//!
//! A thin pass-through to the operating system's file primitives. Seek
//! semantics are exactly those of the OS.
//!
//! Writes go to a hidden staging file next to the target and replace it
//! with a rename on commit, so an abandoned write leaves the target as it
//! was.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::identifier::Identifier;
use crate::traits::{Checksum, Entry, ObjectMeta, ReadStream, WriteStream};

const HASH_BUFFER: usize = 64 * 1024;

/// Local filesystem backend.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Ensure parent directories exist for a path.
    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, &parent.display().to_string()))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn open_read(&self, id: &Identifier) -> Result<LocalReader> {
        let path = id.to_path_buf();
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(e, &id.to_string()))?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(format!("{} (is a folder)", id)));
        }

        debug!("Opening {:?} for read", path);
        let file = File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(e, &id.to_string()))?;
        Ok(LocalReader { file, offset: 0 })
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn open_write(&self, id: &Identifier) -> Result<LocalWriter> {
        let path = id.to_path_buf();
        self.ensure_parent(&path).await?;

        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(StorageError::AlreadyExists(format!("{} (is a folder)", id)));
        }

        let (file, temp) = stage_next_to(&path)
            .await
            .map_err(|e| StorageError::from_io(e, &id.to_string()))?;
        debug!("Staging write to {:?} in {:?}", path, temp);
        Ok(LocalWriter {
            file: File::from_std(file),
            temp: Some(temp),
            path,
            offset: 0,
        })
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn exists(&self, id: &Identifier) -> Result<bool> {
        match fs::metadata(id.to_path_buf()).await {
            Ok(m) => Ok(if id.is_folder() { m.is_dir() } else { m.is_file() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(e, &id.to_string())),
        }
    }

    /// Delete a file. No-op if it does not exist.
    #[instrument(skip(self), fields(path = %id))]
    pub async fn delete(&self, id: &Identifier) -> Result<()> {
        let path = id.to_path_buf();
        debug!("Deleting {:?}", path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, &id.to_string())),
        }
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn head(&self, id: &Identifier) -> Result<ObjectMeta> {
        let metadata = fs::metadata(id.to_path_buf())
            .await
            .map_err(|e| StorageError::from_io(e, &id.to_string()))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(format!("{} (is a folder)", id)));
        }

        Ok(ObjectMeta {
            id: id.clone(),
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            etag: None,
        })
    }

    /// SHA-256 of the file content, computed by streaming the file.
    #[instrument(skip(self), fields(path = %id))]
    pub async fn checksum(&self, id: &Identifier) -> Result<Checksum> {
        let mut reader = self.open_read(id).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUFFER];
        loop {
            let n = reader.file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Checksum::Sha256(hex::encode(hasher.finalize())))
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn copy(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let from_path = from.to_path_buf();
        let to_path = to.to_path_buf();

        if !self.exists(from).await? {
            return Err(StorageError::NotFound(from.to_string()));
        }

        self.ensure_parent(&to_path).await?;
        debug!("Copying {:?} to {:?}", from_path, to_path);
        fs::copy(&from_path, &to_path)
            .await
            .map_err(|e| StorageError::from_io(e, &to.to_string()))?;
        Ok(())
    }

    /// Atomic rename. Cross-device renames report `NotSupported` so the
    /// caller can fall back to streaming.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn rename(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let from_path = from.to_path_buf();
        let to_path = to.to_path_buf();

        if !self.exists(from).await? {
            return Err(StorageError::NotFound(from.to_string()));
        }

        self.ensure_parent(&to_path).await?;
        debug!("Renaming {:?} to {:?}", from_path, to_path);
        match fs::rename(&from_path, &to_path).await {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => Err(StorageError::NotSupported(format!(
                "rename across devices: {} -> {}",
                from, to
            ))),
            Err(e) => Err(StorageError::from_io(e, &from.to_string())),
        }
    }

    pub async fn create_dir(&self, id: &Identifier) -> Result<()> {
        fs::create_dir_all(id.to_path_buf())
            .await
            .map_err(|e| StorageError::from_io(e, &id.to_string()))
    }

    /// Remove now-empty directories, deepest first. Non-empty directories
    /// (children that failed to move or delete) are left in place.
    pub async fn prune_empty_dirs(&self, mut folders: Vec<Identifier>) {
        folders.sort_by_key(|f| std::cmp::Reverse(f.segments().len()));
        for folder in folders {
            if let Err(e) = fs::remove_dir(folder.to_path_buf()).await {
                debug!(path = %folder, "keeping directory: {}", e);
            }
        }
    }
}

/// Create a hidden staging file in the target's directory.
async fn stage_next_to(path: &Path) -> std::io::Result<(std::fs::File, TempPath)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!(
        ".{}.",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    tokio::task::spawn_blocking(move || {
        let staged = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)?;
        Ok(staged.into_parts())
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Rename the staging file over `target`, carrying over the target's
/// permissions when it already exists.
async fn publish(temp: TempPath, target: PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        match std::fs::metadata(&target) {
            Ok(existing) => std::fs::set_permissions(&temp, existing.permissions())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => set_default_mode(&temp)?,
            Err(e) => return Err(e),
        }
        temp.persist(&target).map_err(|e| e.error)
    })
    .await
    .map_err(std::io::Error::other)?
}

// Staging files are created 0600; a fresh target gets the usual mode.
#[cfg(unix)]
fn set_default_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(18) // EXDEV
}

#[cfg(windows)]
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &std::io::Error) -> bool {
    false
}

/// Open local file in read mode.
#[derive(Debug)]
pub struct LocalReader {
    file: File,
    offset: u64,
}

#[async_trait]
impl ReadStream for LocalReader {
    async fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(n.min(HASH_BUFFER));
        (&mut self.file).take(n as u64).read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        Ok(Bytes::from(buf))
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.offset = self.file.seek(pos).await?;
        Ok(self.offset)
    }

    fn tell(&self) -> u64 {
        self.offset
    }
}

/// Open local file in write mode.
///
/// Bytes land in a staging file until [`WriteStream::commit`]. Dropping the
/// writer without committing removes the staging file.
#[derive(Debug)]
pub struct LocalWriter {
    file: File,
    /// `None` once committed or aborted
    temp: Option<TempPath>,
    path: PathBuf,
    offset: u64,
}

impl LocalWriter {
    fn staged(&self) -> Result<()> {
        if self.temp.is_none() {
            return Err(StorageError::State(format!(
                "write to {} already finished",
                self.path.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WriteStream for LocalWriter {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.staged()?;
        self.file.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(data.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.offset = self.file.seek(pos).await?;
        Ok(self.offset)
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.staged()?;
        debug!("Saving data into {:?}", self.path);
        self.file.flush().await?;
        self.file.sync_all().await?;
        if let Some(temp) = self.temp.take() {
            publish(temp, self.path.clone())
                .await
                .map_err(|e| StorageError::from_io(e, &self.path.display().to_string()))?;
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        if let Some(temp) = self.temp.take() {
            debug!("Discarding staged write to {:?}", self.path);
            temp.close()
                .map_err(|e| StorageError::from_io(e, &self.path.display().to_string()))?;
        }
        Ok(())
    }
}

/// Directory walk backing a local folder listing.
///
/// Holds the open `ReadDir` of the directory being enumerated plus the
/// directories still to visit, so each page resumes where the last ended.
#[derive(Debug)]
pub(crate) struct LocalCursor {
    root: Identifier,
    recursive: bool,
    pending: Vec<Vec<String>>,
    current: Option<(fs::ReadDir, Vec<String>)>,
}

impl LocalCursor {
    pub(crate) fn new(root: Identifier, recursive: bool) -> Self {
        Self {
            root,
            recursive,
            pending: vec![Vec::new()],
            current: None,
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    pub(crate) async fn next_page(&mut self, page_size: usize) -> Result<Vec<Entry>> {
        let mut page = Vec::new();
        while page.len() < page_size {
            if self.current.is_none() {
                let Some(relative) = self.pending.pop() else {
                    break;
                };
                let dir = self.root.child_of(&relative, true);
                match fs::read_dir(dir.to_path_buf()).await {
                    Ok(read_dir) => self.current = Some((read_dir, relative)),
                    // A missing root lists as empty.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound && relative.is_empty() => {
                        continue
                    }
                    Err(e) => return Err(StorageError::from_io(e, &dir.to_string())),
                }
            }

            let Some((read_dir, relative)) = self.current.as_mut() else {
                continue;
            };
            let next = read_dir
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(e, &self.root.to_string()))?;
            let Some(dir_entry) = next else {
                self.current = None;
                continue;
            };

            let mut child = relative.clone();
            child.push(dir_entry.file_name().to_string_lossy().into_owned());
            let metadata = match fs::metadata(dir_entry.path()).await {
                Ok(m) => m,
                // Entry vanished (or dangling symlink) between readdir and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::from_io(e, &dir_entry.path().display().to_string())),
            };

            if metadata.is_dir() {
                if self.recursive {
                    self.pending.push(child.clone());
                }
                page.push(Entry::folder(self.root.child_of(&child, true)));
            } else {
                page.push(Entry::file(
                    self.root.child_of(&child, false),
                    metadata.len(),
                    metadata.modified().ok().map(DateTime::<Utc>::from),
                ));
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id_in(dir: &TempDir, rel: &str) -> Identifier {
        Identifier::parse(&format!("{}/{}", dir.path().display(), rel)).unwrap()
    }

    async fn write_file(backend: &LocalBackend, id: &Identifier, data: &[u8]) {
        let mut writer = backend.open_write(id).await.unwrap();
        writer.write(data).await.unwrap();
        writer.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "nested/deeper/data.bin");

        write_file(&backend, &id, b"hello world").await;

        let mut reader = backend.open_read(&id).await.unwrap();
        assert_eq!(reader.read(5).await.unwrap(), Bytes::from("hello"));
        assert_eq!(reader.tell(), 5);
        assert_eq!(reader.read(100).await.unwrap(), Bytes::from(" world"));
        assert!(reader.read(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seek_matches_os() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "seek.bin");
        write_file(&backend, &id, b"0123456789").await;

        let mut reader = backend.open_read(&id).await.unwrap();
        assert_eq!(reader.seek(SeekFrom::End(-3)).await.unwrap(), 7);
        assert_eq!(reader.read(3).await.unwrap(), Bytes::from("789"));
        assert_eq!(reader.seek(SeekFrom::Current(-5)).await.unwrap(), 5);
        assert_eq!(reader.read(1).await.unwrap(), Bytes::from("5"));
        assert_eq!(reader.seek(SeekFrom::Start(20)).await.unwrap(), 20);
        assert!(reader.read(1).await.unwrap().is_empty());
        assert!(reader.seek(SeekFrom::Current(-100)).await.is_err());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let err = backend.open_read(&id_in(&dir, "missing.bin")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_write_truncates() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "data.bin");

        write_file(&backend, &id, b"version 1 is longer").await;
        write_file(&backend, &id, b"version 2").await;

        assert_eq!(backend.head(&id).await.unwrap().size, 9);
    }

    #[tokio::test]
    async fn test_uncommitted_write_keeps_original() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "keep.txt");
        write_file(&backend, &id, b"original").await;

        let mut writer = backend.open_write(&id).await.unwrap();
        writer.write(b"uncommitted").await.unwrap();
        drop(writer);

        let mut aborted = backend.open_write(&id).await.unwrap();
        aborted.write(b"aborted").await.unwrap();
        aborted.abort().await.unwrap();
        assert!(aborted.write(b"late").await.is_err());

        assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"original");
        // No staging files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_write_is_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "fresh/new.txt");

        let mut writer = backend.open_write(&id).await.unwrap();
        writer.write(b"pending").await.unwrap();
        writer.flush().await.unwrap();
        assert!(!backend.exists(&id).await.unwrap());

        writer.commit().await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("fresh/new.txt")).unwrap(), b"pending");
        assert!(writer.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_exists_and_delete_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "a.txt");

        assert!(!backend.exists(&id).await.unwrap());
        write_file(&backend, &id, b"a").await;
        assert!(backend.exists(&id).await.unwrap());
        assert!(!backend.exists(&id.as_folder()).await.unwrap());

        backend.delete(&id).await.unwrap();
        assert!(!backend.exists(&id).await.unwrap());
        backend.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_head_and_checksum() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let id = id_in(&dir, "hash.txt");
        write_file(&backend, &id, b"abc").await;

        let meta = backend.head(&id).await.unwrap();
        assert_eq!(meta.size, 3);
        assert!(meta.last_modified.is_some());

        let checksum = backend.checksum(&id).await.unwrap();
        assert_eq!(
            checksum,
            Checksum::Sha256(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let src = id_in(&dir, "src.bin");
        let copy = id_in(&dir, "out/copy.bin");
        let moved = id_in(&dir, "out/moved.bin");
        write_file(&backend, &src, b"payload").await;

        backend.copy(&src, &copy).await.unwrap();
        assert!(backend.exists(&src).await.unwrap());
        assert!(backend.exists(&copy).await.unwrap());

        backend.rename(&src, &moved).await.unwrap();
        assert!(!backend.exists(&src).await.unwrap());
        assert_eq!(backend.head(&moved).await.unwrap().size, 7);
    }

    #[tokio::test]
    async fn test_copy_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let err = backend
            .copy(&id_in(&dir, "missing"), &id_in(&dir, "copy"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cursor_pages_and_recursion() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        for rel in ["a.txt", "b.txt", "sub/c.txt", "sub/inner/d.txt"] {
            write_file(&backend, &id_in(&dir, rel), b"x").await;
        }
        let root = id_in(&dir, "").as_folder();

        let mut cursor = LocalCursor::new(root.clone(), false);
        let mut shallow = Vec::new();
        while !cursor.is_exhausted() {
            shallow.extend(cursor.next_page(2).await.unwrap());
        }
        assert_eq!(shallow.len(), 3);
        assert_eq!(shallow.iter().filter(|e| e.is_folder()).count(), 1);

        let mut cursor = LocalCursor::new(root, true);
        let mut deep = Vec::new();
        while !cursor.is_exhausted() {
            deep.extend(cursor.next_page(1).await.unwrap());
        }
        assert_eq!(deep.iter().filter(|e| e.is_file()).count(), 4);
        assert_eq!(deep.iter().filter(|e| e.is_folder()).count(), 2);
    }

    #[tokio::test]
    async fn test_cursor_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut cursor = LocalCursor::new(id_in(&dir, "nope/").as_folder(), true);
        assert!(cursor.next_page(10).await.unwrap().is_empty());
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_prune_empty_dirs_keeps_non_empty() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        write_file(&backend, &id_in(&dir, "keep/file.txt"), b"x").await;
        backend.create_dir(&id_in(&dir, "empty/inner/")).await.unwrap();

        backend
            .prune_empty_dirs(vec![
                id_in(&dir, "empty/"),
                id_in(&dir, "empty/inner/"),
                id_in(&dir, "keep/"),
            ])
            .await;

        assert!(!dir.path().join("empty").exists());
        assert!(dir.path().join("keep/file.txt").exists());
    }
}
