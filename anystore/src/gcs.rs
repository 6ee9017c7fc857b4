//! Google Cloud Storage client construction.

use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::debug;

use crate::config::GcsSettings;
use crate::credentials::{CredentialCache, GcpCredentialAdapter};
use crate::error::{Result, StorageError};
use crate::identifier::Scheme;

/// Build a client for one bucket.
///
/// Precedence: a credential registered in the cache, then the configured
/// service account file, then application default credentials.
pub(crate) fn build_store(
    bucket: &str,
    settings: &GcsSettings,
    credentials: &Arc<CredentialCache>,
) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);

    if credentials.contains(&Scheme::Gcs) {
        debug!(bucket, "using cached credential for gs");
        builder = builder.with_credentials(Arc::new(GcpCredentialAdapter {
            cache: credentials.clone(),
            scheme: Scheme::Gcs,
        }));
    } else if let Some(path) = &settings.service_account_path {
        builder = builder.with_service_account_path(path.to_string_lossy());
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::Config(format!("gs://{}: {}", bucket, e)))?;

    Ok(Arc::new(store))
}
