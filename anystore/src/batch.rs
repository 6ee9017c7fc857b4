//! Bulk operations over an explicit set of files.
//!
//! Files are grouped by bucket so each group can go to its store as bulk
//! requests of up to [`DELETE_BATCH_SIZE`] keys.

use tracing::{debug, instrument};

use crate::backend::Backend;
use crate::error::{BatchReport, Result, StorageError};
use crate::file::StorageFile;
use crate::identifier::{Identifier, Scheme};

pub use crate::object::DELETE_BATCH_SIZE;

#[derive(Debug)]
struct Group {
    backend: Backend,
    ids: Vec<Identifier>,
}

/// A set of files sharing one scheme.
#[derive(Debug, Default)]
pub struct FileBatch {
    scheme: Option<Scheme>,
    groups: Vec<Group>,
}

impl FileBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch over `files`; fails if they span more than one scheme.
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a StorageFile>) -> Result<Self> {
        let mut batch = Self::new();
        for file in files {
            batch.push(file)?;
        }
        Ok(batch)
    }

    /// Add a file. Its scheme must match the files already added.
    pub fn push(&mut self, file: &StorageFile) -> Result<()> {
        let id = file.id();
        match &self.scheme {
            Some(scheme) if scheme != id.scheme() => {
                return Err(StorageError::NotSupported(format!(
                    "batch of {} files cannot hold {}",
                    scheme, id
                )))
            }
            Some(_) => {}
            None => self.scheme = Some(id.scheme().clone()),
        }

        match self
            .groups
            .iter_mut()
            .find(|group| group.ids.first().is_some_and(|first| first.same_store(id)))
        {
            Some(group) => group.ids.push(id.clone()),
            None => self.groups.push(Group {
                backend: file.backend().clone(),
                ids: vec![id.clone()],
            }),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|group| group.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn scheme(&self) -> Option<&Scheme> {
        self.scheme.as_ref()
    }

    /// Identifiers in the batch, grouped by bucket.
    pub fn ids(&self) -> impl Iterator<Item = &Identifier> {
        self.groups.iter().flat_map(|group| group.ids.iter())
    }

    /// Delete every file. Missing files count as deleted; a failure on one
    /// file does not stop the rest.
    #[instrument(skip(self), fields(files = self.len()))]
    pub async fn delete(&self) -> Result<BatchReport> {
        let mut report = BatchReport::new("delete");
        for group in &self.groups {
            debug!(backend = group.backend.name(), files = group.ids.len(), "deleting group");
            let outcomes = group.backend.delete_many(&group.ids).await;
            for (id, outcome) in group.ids.iter().zip(outcomes) {
                report.record(id.to_string(), outcome);
            }
        }
        report.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::credentials::CredentialCache;
    use crate::resolver::Resolver;
    use object_store::memory::InMemory;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn resolver() -> Resolver {
        let resolver =
            Resolver::with_credentials(StorageConfig::default(), Arc::new(CredentialCache::new()));
        resolver.mount(Scheme::S3, "one", Arc::new(InMemory::new()));
        resolver.mount(Scheme::S3, "two", Arc::new(InMemory::new()));
        resolver
    }

    async fn stored(resolver: &Resolver, uri: &str) -> StorageFile {
        let mut file = StorageFile::with_resolver(uri, resolver).unwrap();
        file.write_all(b"x").await.unwrap();
        file
    }

    #[tokio::test]
    async fn test_groups_by_bucket_and_deletes_all() {
        let resolver = resolver();
        let files = vec![
            stored(&resolver, "s3://one/a").await,
            stored(&resolver, "s3://two/b").await,
            stored(&resolver, "s3://one/c").await,
        ];
        let never_written = StorageFile::with_resolver("s3://two/missing", &resolver).unwrap();

        let mut batch = FileBatch::from_files(&files).unwrap();
        batch.push(&never_written).unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.groups.len(), 2);
        assert_eq!(batch.scheme(), Some(&Scheme::S3));

        let report = batch.delete().await.unwrap();
        assert_eq!(report.succeeded.len(), 4);
        for file in &files {
            assert!(!file.exists().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_mixed_schemes_rejected() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver();
        let remote = StorageFile::with_resolver("s3://one/a", &resolver).unwrap();
        let local =
            StorageFile::with_resolver(&dir.path().join("a").display().to_string(), &resolver)
                .unwrap();

        let mut batch = FileBatch::new();
        batch.push(&remote).unwrap();
        let err = batch.push(&local).unwrap_err();
        assert!(err.is_not_supported());
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_deletes_nothing() {
        let batch = FileBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.delete().await.unwrap().total(), 0);
    }
}
