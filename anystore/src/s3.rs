//! S3-compatible object store client construction.
//!
//! Uses the `object_store` crate for S3, MinIO, and other S3-compatible
//! services. One client is built per bucket and cached by the resolver.
//!
//! # Configuration
//!
//! ```toml
//! [s3]
//! region = "us-east-1"
//!
//! # Optional: For MinIO or other S3-compatible services
//! endpoint = "http://localhost:9000"
//! force_path_style = true
//! allow_http = true
//! ```

use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::debug;

use crate::config::S3Settings;
use crate::credentials::{AwsCredentialAdapter, CredentialCache};
use crate::error::{Result, StorageError};
use crate::identifier::Scheme;

impl S3Settings {
    /// Settings for AWS in the given region.
    pub fn aws(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    /// Settings for MinIO or other S3-compatible services.
    pub fn minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            force_path_style: true,
            allow_http: true,
            ..Default::default()
        }
    }

    /// Set explicit static keys.
    pub fn with_keys(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

/// Build a client for one bucket.
///
/// A credential registered in the cache takes precedence over static keys
/// in the settings; with neither, the client falls back to the AWS
/// environment chain.
pub(crate) fn build_store(
    bucket: &str,
    settings: &S3Settings,
    credentials: &Arc<CredentialCache>,
) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(&settings.region)
        .with_allow_http(settings.allow_http);

    if let Some(endpoint) = &settings.endpoint {
        builder = builder.with_endpoint(endpoint);
    }

    if settings.force_path_style {
        builder = builder.with_virtual_hosted_style_request(false);
    }

    if credentials.contains(&Scheme::S3) {
        debug!(bucket, "using cached credential for s3");
        builder = builder.with_credentials(Arc::new(AwsCredentialAdapter {
            cache: credentials.clone(),
            scheme: Scheme::S3,
        }));
    } else if let (Some(key_id), Some(secret)) =
        (&settings.access_key_id, &settings.secret_access_key)
    {
        builder = builder
            .with_access_key_id(key_id)
            .with_secret_access_key(secret);
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::Config(format!("s3://{}: {}", bucket, e)))?;

    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredential;

    #[test]
    fn test_s3_settings_aws() {
        let settings = S3Settings::aws("us-west-2");
        assert_eq!(settings.region, "us-west-2");
        assert!(!settings.force_path_style);
        assert!(settings.endpoint.is_none());
    }

    #[test]
    fn test_s3_settings_minio() {
        let settings = S3Settings::minio("http://localhost:9000").with_keys("minioadmin", "minioadmin");
        assert!(settings.force_path_style);
        assert!(settings.allow_http);
        assert_eq!(settings.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(settings.access_key_id.as_deref(), Some("minioadmin"));
    }

    #[test]
    fn test_build_with_static_keys() {
        let settings = S3Settings::minio("http://localhost:9000").with_keys("key", "secret");
        let store = build_store("bucket", &settings, &Arc::new(CredentialCache::new())).unwrap();
        assert!(store.to_string().contains("bucket"));
    }

    #[test]
    fn test_build_with_cached_credential() {
        let cache = Arc::new(CredentialCache::new());
        cache.register(Scheme::S3, Arc::new(StaticCredential::aws("key", "secret")));
        let settings = S3Settings::minio("http://localhost:9000");
        assert!(build_store("bucket", &settings, &cache).is_ok());
    }

    // Integration test requires a running MinIO - run with:
    // cargo test -p anystore -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_s3_integration() {
        use crate::config::StorageConfig;
        use crate::object::ObjectBackend;
        use crate::traits::{ReadStream, WriteStream};
        use crate::Identifier;

        let cache = Arc::new(CredentialCache::new());
        let settings = S3Settings::minio("http://localhost:9000").with_keys("minioadmin", "minioadmin");
        let store = build_store("test-bucket", &settings, &cache).unwrap();
        let backend =
            ObjectBackend::new(store, Scheme::S3, "test-bucket", &StorageConfig::default(), cache);
        let id = Identifier::parse("s3://test-bucket/integration/test.bin").unwrap();

        let mut writer = backend.open_write(&id).await.unwrap();
        writer.write(b"integration test data").await.unwrap();
        writer.commit().await.unwrap();

        let mut reader = backend.open_read(&id).await.unwrap();
        assert_eq!(&reader.read(1024).await.unwrap()[..], b"integration test data");

        assert!(backend.exists(&id).await.unwrap());
        backend.delete(&id).await.unwrap();
        assert!(!backend.exists(&id).await.unwrap());
    }
}
