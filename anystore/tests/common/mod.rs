//! Shared fixtures for the integration tests.
//!
//! [`FaultyStore`] wraps an in-memory object store and injects the failures
//! a real service produces: throttled listings, broken response bodies,
//! rejected credentials and per-key permission errors. It also counts
//! listing, read and bulk delete requests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, GetResultPayload, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, Result,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anystore::{CredentialCache, Resolver, Scheme, StorageConfig};

fn transient(what: &str) -> object_store::Error {
    object_store::Error::Generic {
        store: "faulty",
        source: format!("injected 503 on {}", what).into(),
    }
}

/// Consume one unit of an injected-failure budget.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemory,
    /// List calls that yield one entry and then fail
    pub list_failures: AtomicUsize,
    /// GETs whose body breaks half way
    pub body_failures: AtomicUsize,
    /// Calls rejected as unauthenticated
    pub auth_failures: AtomicUsize,
    /// Reject every single-shot put
    pub deny_puts: AtomicBool,
    /// Hang every body GET until the caller gives up
    pub stall_reads: AtomicBool,
    /// Keys whose delete is rejected
    pub denied_deletes: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub delimiter_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    /// Bulk delete requests
    pub bulk_deletes: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_delete(&self, key: &str) {
        self.denied_deletes.lock().unwrap().insert(key.to_string());
    }

    fn check_auth(&self, location: &Path) -> Result<()> {
        if take(&self.auth_failures) {
            return Err(object_store::Error::Unauthenticated {
                path: location.to_string(),
                source: "injected 401".into(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultyStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put_opts(&self, location: &Path, payload: PutPayload, opts: PutOptions) -> Result<PutResult> {
        self.check_auth(location)?;
        if self.deny_puts.load(Ordering::SeqCst) {
            return Err(object_store::Error::PermissionDenied {
                path: location.to_string(),
                source: "injected 403".into(),
            });
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.check_auth(location)?;
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.check_auth(location)?;
        let head = options.head;
        if !head {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.stall_reads.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
        let mut result = self.inner.get_opts(location, options).await?;
        if head || !take(&self.body_failures) {
            return Ok(result);
        }

        let placeholder = GetResultPayload::Stream(futures::stream::empty().boxed());
        if let GetResultPayload::Stream(body) = std::mem::replace(&mut result.payload, placeholder) {
            result.payload = GetResultPayload::Stream(break_half_way(body));
        }
        Ok(result)
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.check_auth(location)?;
        if self.denied_deletes.lock().unwrap().contains(&location.to_string()) {
            return Err(object_store::Error::PermissionDenied {
                path: location.to_string(),
                source: "injected 403".into(),
            });
        }
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, Result<ObjectMeta>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let stream = self.inner.list(prefix);
        if take(&self.list_failures) {
            stream
                .take(1)
                .chain(futures::stream::once(async { Err(transient("list")) }))
                .boxed()
        } else {
            stream
        }
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.delimiter_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.list_failures) {
            return Err(transient("list"));
        }
        self.inner.list_with_delimiter(prefix).await
    }

    fn delete_stream<'a>(
        &'a self,
        locations: BoxStream<'a, Result<Path>>,
    ) -> BoxStream<'a, Result<Path>> {
        self.bulk_deletes.fetch_add(1, Ordering::SeqCst);
        locations
            .map(move |location| async move {
                let location = location?;
                self.delete(&location).await?;
                Ok(location)
            })
            .buffered(10)
            .boxed()
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.check_auth(from)?;
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

/// Deliver the first half of the body, then fail like a dropped connection.
fn break_half_way(
    body: BoxStream<'static, Result<Bytes>>,
) -> BoxStream<'static, Result<Bytes>> {
    body.flat_map(|chunk| {
        let items: Vec<Result<Bytes>> = match chunk {
            Ok(bytes) if bytes.len() > 1 => vec![Ok(bytes.slice(..bytes.len() / 2)), Err(transient("body"))],
            other => vec![other],
        };
        futures::stream::iter(items)
    })
    .take_while({
        let mut failed = false;
        move |item| {
            let keep = !failed;
            failed |= item.is_err();
            futures::future::ready(keep)
        }
    })
    .boxed()
}

/// Small thresholds and near-zero backoff so tests exercise every path fast.
pub fn test_config() -> StorageConfig {
    let mut config = StorageConfig {
        write_threshold: 64,
        chunk_size: 16,
        list_page_size: 3,
        ..Default::default()
    };
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

/// Resolver with a private credential cache and `store` mounted at
/// `s3://bucket`.
pub fn resolver_with(store: Arc<dyn ObjectStore>) -> Resolver {
    let resolver = Resolver::with_credentials(test_config(), Arc::new(CredentialCache::new()));
    resolver.mount(Scheme::S3, "bucket", store);
    resolver
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
