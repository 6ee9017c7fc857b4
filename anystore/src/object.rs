//! Object-store backend shared by the S3 and GCS schemes.
//!
//! Wraps an `object_store::ObjectStore` for one bucket. Reads stream the
//! object body and re-issue ranged requests after a seek; writes buffer in
//! memory and switch to a multipart upload once the buffer passes the
//! configured threshold. Nothing is visible at the destination until commit.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, MultipartUpload, ObjectStore, PutPayload};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::StorageConfig;
use crate::credentials::CredentialCache;
use crate::error::{Result, StorageError};
use crate::identifier::{Identifier, Scheme};
use crate::retry::RetryPolicy;
use crate::traits::{resolve_seek, Checksum, Entry, ObjectMeta, ReadStream, WriteStream};

/// Retry wrapper for individual store calls.
///
/// Transient failures are retried under the policy. An authentication
/// failure invalidates the scheme's cached credential and the call is
/// retried once more.
#[derive(Debug, Clone)]
pub(crate) struct Retrier {
    policy: RetryPolicy,
    credentials: Arc<CredentialCache>,
    scheme: Scheme,
}

impl Retrier {
    pub(crate) fn new(policy: RetryPolicy, credentials: Arc<CredentialCache>, scheme: Scheme) -> Self {
        Self {
            policy,
            credentials,
            scheme,
        }
    }

    pub(crate) async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.policy.run(operation, &mut op).await {
            Err(e) if e.is_auth() && self.credentials.invalidate(&self.scheme) => {
                warn!(operation, scheme = %self.scheme, "authentication rejected, retrying with refreshed credential: {}", e);
                self.policy.run(operation, op).await
            }
            other => other,
        }
    }
}

/// Most keys sent in one bulk delete request. Below the S3 limit of 1000
/// and the GCS batch limit.
pub const DELETE_BATCH_SIZE: usize = 900;

/// Map a store error, reporting missing objects by their full identifier.
fn store_error(err: object_store::Error, id: &Identifier) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(id.to_string()),
        other => other.into(),
    }
}

fn object_path(id: &Identifier) -> ObjectPath {
    ObjectPath::from(id.key())
}

fn prefix_path(id: &Identifier) -> Option<ObjectPath> {
    if id.segments().is_empty() {
        None
    } else {
        Some(object_path(id))
    }
}

fn strip_etag(etag: Option<String>) -> Option<String> {
    etag.map(|e| e.trim_matches('"').to_string())
}

/// One bucket of an object store.
#[derive(Clone)]
pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    scheme: Scheme,
    container: String,
    retrier: Retrier,
    write_threshold: usize,
}

impl fmt::Debug for ObjectBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBackend")
            .field("scheme", &self.scheme)
            .field("container", &self.container)
            .field("write_threshold", &self.write_threshold)
            .finish()
    }
}

impl ObjectBackend {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scheme: Scheme,
        container: impl Into<String>,
        config: &StorageConfig,
        credentials: Arc<CredentialCache>,
    ) -> Self {
        Self {
            store,
            retrier: Retrier::new(
                RetryPolicy::from_config(&config.retry),
                credentials,
                scheme.clone(),
            ),
            scheme,
            container: container.into(),
            write_threshold: config.write_threshold.max(1),
        }
    }

    /// Raise the spill threshold to at least `min` bytes.
    pub(crate) fn with_min_write_threshold(mut self, min: usize) -> Self {
        self.write_threshold = self.write_threshold.max(min);
        self
    }

    pub fn write_threshold(&self) -> usize {
        self.write_threshold
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn open_read(&self, id: &Identifier) -> Result<ObjectReader> {
        let store = &self.store;
        let location = object_path(id);
        let location_ref = &location;

        debug!("Opening {} for read", id);
        let result = self
            .retrier
            .call("get", || async move {
                store.get(location_ref).await.map_err(|e| store_error(e, id))
            })
            .await?;

        Ok(ObjectReader {
            store: self.store.clone(),
            id: id.clone(),
            size: result.meta.size as u64,
            location,
            offset: 0,
            body: Some(Mutex::new(result.into_stream())),
            pending: Bytes::new(),
            retrier: self.retrier.clone(),
        })
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn open_write(&self, id: &Identifier) -> Result<ObjectWriter> {
        debug!("Opening {} for write", id);
        Ok(ObjectWriter {
            store: self.store.clone(),
            id: id.clone(),
            location: object_path(id),
            retrier: self.retrier.clone(),
            threshold: self.write_threshold,
            buffer: Vec::new(),
            upload: None,
            offset: 0,
            finished: false,
        })
    }

    /// File identifiers check the object; folder identifiers check for any
    /// object under the prefix.
    #[instrument(skip(self), fields(path = %id))]
    pub async fn exists(&self, id: &Identifier) -> Result<bool> {
        if id.is_folder() {
            return self.has_children(id).await;
        }

        match self.head(id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn has_children(&self, id: &Identifier) -> Result<bool> {
        let store = &self.store;
        let prefix = prefix_path(id);
        let prefix = prefix.as_ref();
        self.retrier
            .call("list", || async move {
                let first = store
                    .list(prefix)
                    .try_next()
                    .await
                    .map_err(|e| store_error(e, id))?;
                Ok::<_, StorageError>(first.is_some())
            })
            .await
    }

    /// Delete an object. Deleting a missing object succeeds.
    #[instrument(skip(self), fields(path = %id))]
    pub async fn delete(&self, id: &Identifier) -> Result<()> {
        let store = &self.store;
        let location = object_path(id);
        let location = &location;

        debug!("Deleting {}", id);
        self.retrier
            .call("delete", || async move {
                match store.delete(location).await {
                    Ok(()) => Ok(()),
                    Err(object_store::Error::NotFound { .. }) => Ok(()),
                    Err(e) => Err(store_error(e, id)),
                }
            })
            .await
    }

    /// Delete many objects of this bucket with bulk requests of up to
    /// [`DELETE_BATCH_SIZE`] keys. Returns one outcome per identifier, in
    /// order. Missing objects count as deleted.
    ///
    /// Keys the bulk response does not account for, or reports with a
    /// retryable failure, are deleted one at a time under the retry policy.
    #[instrument(skip(self, ids), fields(container = %self.container, count = ids.len()))]
    pub async fn delete_many(&self, ids: &[Identifier]) -> Vec<Result<()>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(DELETE_BATCH_SIZE) {
            let index: HashMap<String, usize> = chunk
                .iter()
                .enumerate()
                .map(|(i, id)| (object_path(id).to_string(), i))
                .collect();
            let locations: Vec<object_store::Result<ObjectPath>> =
                chunk.iter().map(|id| Ok(object_path(id))).collect();

            debug!(keys = chunk.len(), "bulk delete");
            let mut settled: Vec<Option<Result<()>>> = chunk.iter().map(|_| None).collect();
            let mut responses = self.store.delete_stream(futures::stream::iter(locations).boxed());
            while let Some(response) = responses.next().await {
                let (key, outcome) = match response {
                    Ok(location) => (location.to_string(), Ok(())),
                    Err(object_store::Error::NotFound { path, .. }) => (path, Ok(())),
                    Err(object_store::Error::PermissionDenied { path, source }) => {
                        let key = path.clone();
                        (key, Err(object_store::Error::PermissionDenied { path, source }))
                    }
                    // Unattributed or retryable; settled below.
                    Err(e) => {
                        debug!("bulk delete entry failed: {}", e);
                        continue;
                    }
                };
                if let Some(&i) = index.get(&key) {
                    settled[i] = Some(outcome.map_err(|e| store_error(e, &chunk[i])));
                }
            }
            drop(responses);

            for (id, outcome) in chunk.iter().zip(settled) {
                let outcome = match outcome {
                    Some(outcome) => outcome,
                    None => self.delete(id).await,
                };
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    #[instrument(skip(self), fields(path = %id))]
    pub async fn head(&self, id: &Identifier) -> Result<ObjectMeta> {
        let store = &self.store;
        let location = object_path(id);
        let location = &location;

        let meta = self
            .retrier
            .call("head", || async move {
                store.head(location).await.map_err(|e| store_error(e, id))
            })
            .await?;

        Ok(ObjectMeta {
            id: id.clone(),
            size: meta.size as u64,
            last_modified: Some(meta.last_modified),
            etag: strip_etag(meta.e_tag),
        })
    }

    /// ETag when the store reports one, otherwise SHA-256 of the content.
    #[instrument(skip(self), fields(path = %id))]
    pub async fn checksum(&self, id: &Identifier) -> Result<Checksum> {
        if let Some(etag) = self.head(id).await?.etag {
            return Ok(Checksum::ETag(etag));
        }

        let mut reader = self.open_read(id).await?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = reader.next_chunk().await? {
            hasher.update(&chunk);
        }
        Ok(Checksum::Sha256(hex::encode(hasher.finalize())))
    }

    /// Server-side copy within the bucket.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn copy(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let store = &self.store;
        let (from_path, to_path) = (object_path(from), object_path(to));
        let (from_path, to_path) = (&from_path, &to_path);

        debug!("Copying {} to {}", from, to);
        self.retrier
            .call("copy", || async move {
                store
                    .copy(from_path, to_path)
                    .await
                    .map_err(|e| store_error(e, from))
            })
            .await
    }

    /// Server-side rename within the bucket.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn rename(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let store = &self.store;
        let (from_path, to_path) = (object_path(from), object_path(to));
        let (from_path, to_path) = (&from_path, &to_path);

        debug!("Renaming {} to {}", from, to);
        self.retrier
            .call("rename", || async move {
                store
                    .rename(from_path, to_path)
                    .await
                    .map_err(|e| store_error(e, from))
            })
            .await
    }

    pub(crate) fn cursor(&self, root: Identifier, recursive: bool) -> ObjectCursor {
        ObjectCursor {
            backend: self.clone(),
            prefix: prefix_path(&root),
            root,
            recursive,
            offset: None,
            exhausted: false,
            seen: HashSet::new(),
        }
    }
}

type Body = BoxStream<'static, object_store::Result<Bytes>>;

/// Ranged GET from `offset`.
///
/// Takes owned handles so the returned future borrows nothing from the
/// reader.
async fn open_body(
    store: Arc<dyn ObjectStore>,
    location: ObjectPath,
    id: Identifier,
    retrier: Retrier,
    offset: u64,
) -> Result<Body> {
    let start = offset as usize;
    debug!(path = %id, offset = start, "requesting object range");
    let (store, location, id) = (&store, &location, &id);
    let result = retrier
        .call("get", || async move {
            let options = GetOptions {
                range: Some(GetRange::Offset(start)),
                ..Default::default()
            };
            store
                .get_opts(location, options)
                .await
                .map_err(|e| store_error(e, id))
        })
        .await?;
    Ok(result.into_stream())
}

/// Object opened in read mode.
pub struct ObjectReader {
    store: Arc<dyn ObjectStore>,
    id: Identifier,
    location: ObjectPath,
    size: u64,
    offset: u64,
    /// Response body positioned at `offset + pending.len()`. The lock only
    /// makes the reader `Sync`; access goes through `get_mut`.
    body: Option<Mutex<Body>>,
    pending: Bytes,
    retrier: Retrier,
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("streaming", &self.body.is_some())
            .finish()
    }
}

impl ObjectReader {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Next chunk of the body after `pending` has been drained.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            self.offset += chunk.len() as u64;
            return Ok(Some(chunk));
        }

        let mut restarts = 1;
        loop {
            if self.offset >= self.size {
                self.body = None;
                return Ok(None);
            }
            if self.body.is_none() {
                let body = open_body(
                    self.store.clone(),
                    self.location.clone(),
                    self.id.clone(),
                    self.retrier.clone(),
                    self.offset,
                )
                .await?;
                self.body = Some(Mutex::new(body));
            }
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };

            match body.get_mut().next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.offset += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                None => {
                    self.body = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    // The body cannot be resumed; reissue the range request.
                    self.body = None;
                    let err = store_error(e, &self.id);
                    if !err.is_transient() || restarts >= self.retrier.policy.max_attempts() {
                        return Err(err);
                    }
                    let delay = self.retrier.policy.backoff(restarts);
                    warn!(path = %self.id, offset = self.offset, ?delay, "body stream failed, resuming: {}", err);
                    tokio::time::sleep(delay).await;
                    restarts += 1;
                }
            }
        }
    }
}

#[async_trait]
impl ReadStream for ObjectReader {
    async fn read(&mut self, n: usize) -> Result<Bytes> {
        if n == 0 {
            return Ok(Bytes::new());
        }
        if self.pending.len() >= n {
            self.offset += n as u64;
            return Ok(self.pending.split_to(n));
        }

        let mut out = BytesMut::with_capacity(n.min(self.size.saturating_sub(self.offset) as usize));
        while out.len() < n {
            let Some(mut chunk) = self.next_chunk().await? else {
                break;
            };
            let wanted = n - out.len();
            if chunk.len() > wanted {
                // Hand the tail back; `next_chunk` already advanced past it.
                self.pending = chunk.split_off(wanted);
                self.offset -= self.pending.len() as u64;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.offset, self.size)?;
        if target == self.offset {
            return Ok(target);
        }

        let ahead = target.checked_sub(self.offset);
        match ahead {
            Some(skip) if skip <= self.pending.len() as u64 => {
                let _ = self.pending.split_to(skip as usize);
            }
            _ => {
                self.body = None;
                self.pending = Bytes::new();
            }
        }
        self.offset = target;
        Ok(target)
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    async fn close(&mut self) -> Result<()> {
        self.body = None;
        self.pending = Bytes::new();
        Ok(())
    }
}

/// Object opened in write mode.
pub struct ObjectWriter {
    store: Arc<dyn ObjectStore>,
    id: Identifier,
    location: ObjectPath,
    retrier: Retrier,
    threshold: usize,
    buffer: Vec<u8>,
    upload: Option<Box<dyn MultipartUpload>>,
    offset: u64,
    finished: bool,
}

impl fmt::Debug for ObjectWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWriter")
            .field("id", &self.id)
            .field("buffered", &self.buffer.len())
            .field("multipart", &self.upload.is_some())
            .field("offset", &self.offset)
            .finish()
    }
}

impl ObjectWriter {
    /// True once the buffer has spilled into a multipart upload.
    pub fn is_multipart(&self) -> bool {
        self.upload.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(StorageError::State(format!(
                "{} has already been committed or aborted",
                self.id
            )));
        }
        Ok(())
    }

    /// Upload the buffer as the next part, starting the upload if needed.
    async fn spill(&mut self) -> Result<()> {
        if self.upload.is_none() {
            let store = &self.store;
            let location = &self.location;
            let id = &self.id;
            debug!(path = %id, "starting multipart upload");
            let upload = self
                .retrier
                .call("put_multipart", || async move {
                    store
                        .put_multipart(location)
                        .await
                        .map_err(|e| store_error(e, id))
                })
                .await?;
            self.upload = Some(upload);
        }

        let part = PutPayload::from(std::mem::take(&mut self.buffer));
        let Some(upload) = self.upload.as_mut() else {
            return Ok(());
        };
        // Parts are not retried here: the upload tracks part indices itself.
        if let Err(e) = upload.put_part(part).await {
            let err = store_error(e, &self.id);
            self.cancel_upload().await;
            return Err(err);
        }
        Ok(())
    }

    async fn cancel_upload(&mut self) {
        self.finished = true;
        self.buffer = Vec::new();
        if let Some(mut upload) = self.upload.take() {
            if let Err(e) = upload.abort().await {
                warn!(path = %self.id, "failed to abort multipart upload: {}", e);
            }
        }
    }
}

async fn finish_upload(upload: &mut dyn MultipartUpload, rest: Vec<u8>) -> object_store::Result<()> {
    if !rest.is_empty() {
        upload.put_part(PutPayload::from(rest)).await?;
    }
    upload.complete().await?;
    Ok(())
}

#[async_trait]
impl WriteStream for ObjectWriter {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(data);
        self.offset += data.len() as u64;
        if self.buffer.len() > self.threshold {
            self.spill().await?;
        }
        Ok(data.len())
    }

    /// Object writes are append-only; only a seek to the current position
    /// succeeds.
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.offset, self.offset)?;
        if target != self.offset {
            return Err(StorageError::NotSupported(format!(
                "seek in object write stream {} (at {}, requested {})",
                self.id, self.offset, target
            )));
        }
        Ok(target)
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    async fn flush(&mut self) -> Result<()> {
        // Nothing is visible before commit, so there is nothing to push.
        self.ensure_open()
    }

    #[instrument(skip(self), fields(path = %self.id, size = self.offset))]
    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;

        match self.upload.take() {
            None => {
                let store = &self.store;
                let location = &self.location;
                let id = &self.id;
                let data = Bytes::from(std::mem::take(&mut self.buffer));
                let data = &data;
                debug!("Writing {} bytes to {}", data.len(), id);
                self.retrier
                    .call("put", || async move {
                        store
                            .put(location, PutPayload::from(data.clone()))
                            .await
                            .map_err(|e| store_error(e, id))
                    })
                    .await?;
            }
            Some(mut upload) => {
                debug!("Completing multipart upload of {} bytes to {}", self.offset, self.id);
                let rest = std::mem::take(&mut self.buffer);
                if let Err(e) = finish_upload(upload.as_mut(), rest).await {
                    if let Err(abort) = upload.abort().await {
                        warn!(path = %self.id, "failed to abort multipart upload: {}", abort);
                    }
                    return Err(store_error(e, &self.id));
                }
            }
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        if !self.finished {
            debug!(path = %self.id, "discarding uncommitted write");
            self.cancel_upload().await;
        }
        Ok(())
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        let Some(mut upload) = self.upload.take() else {
            return;
        };
        if self.finished {
            return;
        }
        // Without a runtime the store expires the upload on its own.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let id = self.id.clone();
            handle.spawn(async move {
                if let Err(e) = upload.abort().await {
                    warn!(path = %id, "failed to abort abandoned upload: {}", e);
                }
            });
        }
    }
}

/// Paginated prefix listing.
///
/// Each page is one `list_with_offset` request resuming after the last key
/// seen, retried as a unit. Folders are synthesized from key prefixes.
pub(crate) struct ObjectCursor {
    backend: ObjectBackend,
    root: Identifier,
    prefix: Option<ObjectPath>,
    recursive: bool,
    offset: Option<ObjectPath>,
    exhausted: bool,
    seen: HashSet<Vec<String>>,
}

impl fmt::Debug for ObjectCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCursor")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("offset", &self.offset)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl ObjectCursor {
    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) async fn next_page(&mut self, page_size: usize) -> Result<Vec<Entry>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        if !self.recursive {
            return self.next_level().await;
        }

        let store = &self.backend.store;
        let prefix = self.prefix.as_ref();
        let offset = self.offset.as_ref();
        let root = &self.root;
        let page_size = page_size.max(1);

        let metas: Vec<object_store::ObjectMeta> = self
            .backend
            .retrier
            .call("list", || async move {
                let stream = match offset {
                    Some(offset) => store.list_with_offset(prefix, offset),
                    None => store.list(prefix),
                };
                stream
                    .take(page_size)
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| store_error(e, root))
            })
            .await?;

        debug!(root = %self.root, count = metas.len(), "listed page");
        if metas.len() < page_size {
            self.exhausted = true;
        }
        if let Some(last) = metas.last() {
            self.offset = Some(last.location.clone());
        }

        let depth = self.root.segments().len();
        let mut entries = Vec::with_capacity(metas.len());
        for meta in metas {
            let parts: Vec<String> = meta
                .location
                .parts()
                .map(|p| p.as_ref().to_string())
                .collect();
            let Some(relative) = parts.get(depth..).filter(|r| !r.is_empty()) else {
                continue;
            };

            for end in 1..relative.len() {
                let folder = relative[..end].to_vec();
                if !self.seen.contains(&folder) {
                    entries.push(Entry::folder(self.root.child_of(&folder, true)));
                    self.seen.insert(folder);
                }
            }

            entries.push(Entry::file(
                self.root.child_of(relative, false),
                meta.size as u64,
                Some(meta.last_modified),
            ));
        }
        Ok(entries)
    }

    /// Immediate children via a delimiter listing, so nested keys are never
    /// enumerated. The store pages internally; the level arrives as one page.
    async fn next_level(&mut self) -> Result<Vec<Entry>> {
        let store = &self.backend.store;
        let prefix = self.prefix.as_ref();
        let root = &self.root;

        let listing = self
            .backend
            .retrier
            .call("list", || async move {
                store
                    .list_with_delimiter(prefix)
                    .await
                    .map_err(|e| store_error(e, root))
            })
            .await?;
        self.exhausted = true;
        debug!(
            root = %self.root,
            folders = listing.common_prefixes.len(),
            files = listing.objects.len(),
            "listed level"
        );

        let depth = self.root.segments().len();
        let relative = |location: &ObjectPath| -> Option<Vec<String>> {
            let parts: Vec<String> = location.parts().map(|p| p.as_ref().to_string()).collect();
            parts.get(depth..).filter(|r| !r.is_empty()).map(<[String]>::to_vec)
        };

        let mut entries = Vec::with_capacity(listing.common_prefixes.len() + listing.objects.len());
        for folder in &listing.common_prefixes {
            if let Some(relative) = relative(folder) {
                entries.push(Entry::folder(self.root.child_of(&relative, true)));
            }
        }
        for meta in listing.objects {
            if let Some(relative) = relative(&meta.location) {
                entries.push(Entry::file(
                    self.root.child_of(&relative, false),
                    meta.size as u64,
                    Some(meta.last_modified),
                ));
            }
        }
        entries.sort_by_cached_key(|entry| entry.id.to_string());
        Ok(entries)
    }
}
