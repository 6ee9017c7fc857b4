//! Maps identifiers to backends.
//!
//! Object-store clients are built lazily, one per (scheme, bucket), and
//! cached for the lifetime of the resolver. Clones share the cache.

use object_store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::config::{StorageConfig, MIN_PART_SIZE};
use crate::credentials::CredentialCache;
use crate::error::{Result, StorageError};
use crate::identifier::{Identifier, Scheme};
use crate::local::LocalBackend;
use crate::object::ObjectBackend;
use crate::{gcs, s3};

type StoreKey = (Scheme, String);

#[derive(Clone)]
struct CachedStore {
    store: Arc<dyn ObjectStore>,
    /// Supplied through [`Resolver::mount`] rather than built here
    mounted: bool,
}

struct Inner {
    config: StorageConfig,
    credentials: Arc<CredentialCache>,
    stores: RwLock<HashMap<StoreKey, CachedStore>>,
}

/// Scheme registry and client cache.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stores: Vec<String> = self
            .inner
            .stores
            .read()
            .keys()
            .map(|(scheme, bucket)| format!("{}://{}", scheme, bucket))
            .collect();
        f.debug_struct("Resolver")
            .field("config", &self.inner.config)
            .field("stores", &stores)
            .finish()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl Resolver {
    /// Resolver using the process-wide credential cache.
    pub fn new(config: StorageConfig) -> Self {
        Self::with_credentials(config, CredentialCache::global())
    }

    pub fn with_credentials(config: StorageConfig, credentials: Arc<CredentialCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                stores: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Process-wide resolver configured from `ANYSTORE_CONFIG`.
    ///
    /// An unreadable config file is logged and defaults are used.
    pub fn global() -> Resolver {
        static GLOBAL: OnceLock<Resolver> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let config = StorageConfig::from_env().unwrap_or_else(|e| {
                    warn!("falling back to default storage config: {}", e);
                    StorageConfig::default()
                });
                Resolver::new(config)
            })
            .clone()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.inner.credentials
    }

    /// Serve a bucket from a prebuilt store instead of a network client.
    pub fn mount(&self, scheme: Scheme, container: impl Into<String>, store: Arc<dyn ObjectStore>) {
        let container = container.into();
        debug!(scheme = %scheme, container = %container, "mounting store");
        self.inner
            .stores
            .write()
            .insert((scheme, container), CachedStore { store, mounted: true });
    }

    /// Parse `text` and resolve its backend.
    pub fn parse(&self, text: &str) -> Result<(Identifier, Backend)> {
        let id = Identifier::parse(text)?;
        let backend = self.resolve_backend(&id)?;
        Ok((id, backend))
    }

    /// Backend serving the identifier's scheme and bucket.
    pub fn resolve_backend(&self, id: &Identifier) -> Result<Backend> {
        match id.scheme() {
            Scheme::Local => Ok(Backend::Local(LocalBackend::new())),
            Scheme::Other(name) => Err(StorageError::UnsupportedScheme(name.clone())),
            scheme @ (Scheme::Gcs | Scheme::S3) => {
                let container = id.container().ok_or_else(|| {
                    StorageError::MalformedIdentifier(format!("{}: missing container name", id))
                })?;
                let cached = self.store_for(scheme, container)?;
                let backend = ObjectBackend::new(
                    cached.store,
                    scheme.clone(),
                    container,
                    &self.inner.config,
                    self.inner.credentials.clone(),
                );
                // Real services reject multipart parts below the minimum.
                let backend = if cached.mounted {
                    backend
                } else {
                    backend.with_min_write_threshold(MIN_PART_SIZE)
                };
                Ok(Backend::Object(backend))
            }
        }
    }

    fn store_for(&self, scheme: &Scheme, container: &str) -> Result<CachedStore> {
        let key = (scheme.clone(), container.to_string());
        if let Some(cached) = self.inner.stores.read().get(&key) {
            return Ok(cached.clone());
        }

        let mut stores = self.inner.stores.write();
        // Raced with another builder.
        if let Some(cached) = stores.get(&key) {
            return Ok(cached.clone());
        }

        debug!(scheme = %scheme, container, "building object store client");
        let config = &self.inner.config;
        if config.write_threshold < MIN_PART_SIZE {
            warn!(
                write_threshold = config.write_threshold,
                min = MIN_PART_SIZE,
                "write threshold below minimum part size, raising it"
            );
        }
        let store = match scheme {
            Scheme::S3 => s3::build_store(container, &config.s3, &self.inner.credentials)?,
            Scheme::Gcs => gcs::build_store(container, &config.gcs, &self.inner.credentials)?,
            other => return Err(StorageError::UnsupportedScheme(other.to_string())),
        };
        let cached = CachedStore { store, mounted: false };
        stores.insert(key, cached.clone());
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn resolver() -> Resolver {
        Resolver::with_credentials(StorageConfig::default(), Arc::new(CredentialCache::new()))
    }

    #[test]
    fn test_local_resolves_without_io() {
        let (id, backend) = resolver().parse("/tmp/whatever/file.txt").unwrap();
        assert!(backend.is_local());
        assert_eq!(id.scheme(), &Scheme::Local);
    }

    #[test]
    fn test_unknown_scheme_unsupported() {
        let err = resolver().parse("ftp://host/file").unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedScheme(ref s) if s == "ftp"));
    }

    #[test]
    fn test_malformed_identifier() {
        let err = resolver().parse("s3:///key").unwrap_err();
        assert!(matches!(err, StorageError::MalformedIdentifier(_)));
    }

    #[test]
    fn test_mounted_store_is_used() {
        let resolver = resolver();
        resolver.mount(Scheme::Gcs, "bucket", Arc::new(InMemory::new()));

        let (_, backend) = resolver.parse("gs://bucket/a/b").unwrap();
        assert_eq!(backend.name(), "gs");
    }

    fn threshold_of(backend: Backend) -> usize {
        match backend {
            Backend::Object(object) => object.write_threshold(),
            Backend::Local(_) => panic!("expected an object backend"),
        }
    }

    #[test]
    fn test_built_store_raises_small_write_threshold() {
        let mut config = StorageConfig::default();
        config.write_threshold = 1024;
        config.s3 = crate::config::S3Settings::minio("http://localhost:9000").with_keys("k", "s");
        let resolver = Resolver::with_credentials(config, Arc::new(CredentialCache::new()));

        let (_, built) = resolver.parse("s3://built/key").unwrap();
        assert_eq!(threshold_of(built), MIN_PART_SIZE);

        resolver.mount(Scheme::S3, "mounted", Arc::new(InMemory::new()));
        let (_, mounted) = resolver.parse("s3://mounted/key").unwrap();
        assert_eq!(threshold_of(mounted), 1024);
    }

    #[test]
    fn test_clients_cached_per_bucket() {
        let mut config = StorageConfig::default();
        config.s3 = crate::config::S3Settings::minio("http://localhost:9000").with_keys("k", "s");
        let resolver = Resolver::with_credentials(config, Arc::new(CredentialCache::new()));

        resolver.parse("s3://one/a").unwrap();
        resolver.parse("s3://one/b").unwrap();
        resolver.parse("s3://two/a").unwrap();
        assert_eq!(resolver.inner.stores.read().len(), 2);

        let clone = resolver.clone();
        clone.parse("s3://three/a").unwrap();
        assert_eq!(resolver.inner.stores.read().len(), 3);
    }
}
