//! Process-wide credential cache.
//!
//! Credentials are produced by an external loader and handed over as opaque
//! [`Credential`] objects, one per scheme. The cache is read-mostly: lookups
//! take a shared lock, and the refresh path is serialized per scheme so that
//! concurrent callers observing an expired credential trigger exactly one
//! refresh.

use async_trait::async_trait;
use object_store::aws::AwsCredential;
use object_store::gcp::GcpCredential;
use object_store::CredentialProvider;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::identifier::Scheme;

/// Material a backend client needs to sign one request.
#[derive(Clone, PartialEq, Eq)]
pub enum SigningMaterial {
    /// AWS SigV4 key pair with optional session token
    Aws {
        key_id: String,
        secret_key: String,
        token: Option<String>,
    },
    /// OAuth bearer token
    Bearer(String),
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningMaterial::Aws { key_id, .. } => f
                .debug_struct("Aws")
                .field("key_id", key_id)
                .finish_non_exhaustive(),
            SigningMaterial::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// Opaque credential supplied by an external loader.
#[async_trait]
pub trait Credential: fmt::Debug + Send + Sync {
    /// Material used to sign the next request.
    fn sign_request(&self) -> Result<SigningMaterial>;

    /// True once the credential must be refreshed before use.
    fn is_expired(&self) -> bool;

    /// Refresh the credential in place.
    async fn refresh(&self) -> Result<()>;
}

/// A credential that never expires.
#[derive(Clone)]
pub struct StaticCredential {
    material: SigningMaterial,
}

impl StaticCredential {
    pub fn aws(key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            material: SigningMaterial::Aws {
                key_id: key_id.into(),
                secret_key: secret_key.into(),
                token: None,
            },
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            material: SigningMaterial::Bearer(token.into()),
        }
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredential")
            .field("material", &self.material)
            .finish()
    }
}

#[async_trait]
impl Credential for StaticCredential {
    fn sign_request(&self) -> Result<SigningMaterial> {
        Ok(self.material.clone())
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

struct Entry {
    credential: Arc<dyn Credential>,
    /// Set when a backend reported an authentication failure.
    stale: AtomicBool,
    /// Bumped after every successful refresh.
    generation: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl Entry {
    fn needs_refresh(&self) -> bool {
        self.stale.load(Ordering::Acquire) || self.credential.is_expired()
    }

    async fn refresh_if_needed(&self, scheme: &Scheme) -> Result<()> {
        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        // Another caller refreshed while we waited for the lock.
        if self.generation.load(Ordering::Acquire) != observed || !self.needs_refresh() {
            return Ok(());
        }

        info!(scheme = %scheme, "refreshing credential");
        self.credential.refresh().await?;
        self.stale.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Credentials keyed by scheme.
#[derive(Default)]
pub struct CredentialCache {
    entries: RwLock<HashMap<Scheme, Arc<Entry>>>,
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemes: Vec<String> = self.entries.read().keys().map(|s| s.to_string()).collect();
        f.debug_struct("CredentialCache")
            .field("schemes", &schemes)
            .finish()
    }
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> Arc<CredentialCache> {
        static GLOBAL: OnceLock<Arc<CredentialCache>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(CredentialCache::new()))
            .clone()
    }

    /// Install or replace the credential for a scheme.
    pub fn register(&self, scheme: Scheme, credential: Arc<dyn Credential>) {
        debug!(scheme = %scheme, "registering credential");
        let entry = Arc::new(Entry {
            credential,
            stale: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
        });
        self.entries.write().insert(scheme, entry);
    }

    /// True if a credential is registered for the scheme.
    pub fn contains(&self, scheme: &Scheme) -> bool {
        self.entries.read().contains_key(scheme)
    }

    /// Mark the scheme's credential stale; the next use refreshes it.
    ///
    /// Returns false when no credential is registered.
    pub fn invalidate(&self, scheme: &Scheme) -> bool {
        match self.entries.read().get(scheme) {
            Some(entry) => {
                debug!(scheme = %scheme, "invalidating credential");
                entry.stale.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Number of refreshes performed for the scheme.
    pub fn generation(&self, scheme: &Scheme) -> Option<u64> {
        self.entries
            .read()
            .get(scheme)
            .map(|e| e.generation.load(Ordering::Acquire))
    }

    /// Signing material for the scheme, refreshing first if required.
    pub async fn signing_material(&self, scheme: &Scheme) -> Result<SigningMaterial> {
        let entry = self
            .entries
            .read()
            .get(scheme)
            .cloned()
            .ok_or_else(|| StorageError::Auth(format!("no credential registered for {}", scheme)))?;

        if entry.needs_refresh() {
            entry.refresh_if_needed(scheme).await?;
        }
        entry.credential.sign_request()
    }
}

fn provider_error(scheme: &Scheme, err: StorageError) -> object_store::Error {
    object_store::Error::Unauthenticated {
        path: scheme.to_string(),
        source: Box::new(err),
    }
}

/// Adapts the cache to the S3 client's credential provider interface.
#[derive(Debug)]
pub(crate) struct AwsCredentialAdapter {
    pub(crate) cache: Arc<CredentialCache>,
    pub(crate) scheme: Scheme,
}

#[async_trait]
impl CredentialProvider for AwsCredentialAdapter {
    type Credential = AwsCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AwsCredential>> {
        match self.cache.signing_material(&self.scheme).await {
            Ok(SigningMaterial::Aws {
                key_id,
                secret_key,
                token,
            }) => Ok(Arc::new(AwsCredential {
                key_id,
                secret_key,
                token,
            })),
            Ok(other) => Err(provider_error(
                &self.scheme,
                StorageError::Auth(format!("expected AWS key pair, got {:?}", other)),
            )),
            Err(e) => Err(provider_error(&self.scheme, e)),
        }
    }
}

/// Adapts the cache to the GCS client's credential provider interface.
#[derive(Debug)]
pub(crate) struct GcpCredentialAdapter {
    pub(crate) cache: Arc<CredentialCache>,
    pub(crate) scheme: Scheme,
}

#[async_trait]
impl CredentialProvider for GcpCredentialAdapter {
    type Credential = GcpCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<GcpCredential>> {
        match self.cache.signing_material(&self.scheme).await {
            Ok(SigningMaterial::Bearer(bearer)) => Ok(Arc::new(GcpCredential { bearer })),
            Ok(other) => Err(provider_error(
                &self.scheme,
                StorageError::Auth(format!("expected bearer token, got {:?}", other)),
            )),
            Err(e) => Err(provider_error(&self.scheme, e)),
        }
    }
}
