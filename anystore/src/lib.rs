//! Unified storage abstraction over local disk, Google Cloud Storage and S3.
//!
//! Every location is named by an [`Identifier`] (`gs://bucket/a/b`,
//! `s3://bucket/a/b`, `file:///a/b` or a bare path). The [`Resolver`] maps
//! the identifier's scheme to a [`Backend`], and the same file and folder
//! operations then work against any of them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │   StorageFile        StorageFolder     Transfer │
//! │   (open/read/        (list, copy,      (native  │
//! │    write/seek)        move, delete)     or      │
//! │        │                  │             stream) │
//! │        └──────────┬───────┴─────────────┘       │
//! │                   ▼                             │
//! │              ┌──────────┐                       │
//! │              │ Resolver │  scheme → Backend     │
//! │              └────┬─────┘                       │
//! │          ┌────────┴─────────┐                   │
//! │          ▼                  ▼                   │
//! │   ┌────────────┐   ┌──────────────────┐         │
//! │   │   Local    │   │  Object (GCS/S3) │◀─ CredentialCache
//! │   └────────────┘   └──────────────────┘         │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use anystore::{OpenMode, StorageFile, StorageFolder};
//!
//! # async fn example() -> anystore::Result<()> {
//! // Write an object; nothing is visible until close()
//! let mut file = StorageFile::new("s3://my-bucket/reports/q1.csv")?;
//! file.open(OpenMode::Write).await?;
//! file.write(b"region,total\n").await?;
//! file.close().await?;
//!
//! // Copy it to local disk
//! let local = anystore::Identifier::parse("/tmp/q1.csv")?;
//! file.copy_to(&local).await?;
//!
//! // List a folder lazily
//! let folder = StorageFolder::new("gs://archive/2024/")?;
//! let mut listing = folder.list(true);
//! while let Some(entry) = listing.next().await? {
//!     println!("{}", entry.id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Credentials
//!
//! ```no_run
//! use anystore::{CredentialCache, Scheme, StaticCredential};
//! use std::sync::Arc;
//!
//! CredentialCache::global().register(
//!     Scheme::S3,
//!     Arc::new(StaticCredential::aws("AKIA...", "secret")),
//! );
//! ```
//!
//! Without a registered credential the clients use their default
//! environment chain.

mod backend;
mod batch;
mod config;
mod credentials;
mod error;
mod file;
mod folder;
mod gcs;
mod identifier;
mod local;
mod object;
mod resolver;
mod retry;
mod s3;
mod traits;
mod transfer;

pub use backend::{Backend, Reader, Writer};
pub use batch::{FileBatch, DELETE_BATCH_SIZE};
pub use config::{
    expand_tilde, GcsSettings, RetryConfig, S3Settings, StorageConfig, CONFIG_ENV, MIN_PART_SIZE,
};
pub use credentials::{Credential, CredentialCache, SigningMaterial, StaticCredential};
pub use error::{BatchFailure, BatchReport, ErrorKind, Result, StorageError};
pub use file::{OpenFile, StorageFile};
pub use folder::{Listing, StorageFolder};
pub use identifier::{Identifier, Scheme};
pub use local::{LocalBackend, LocalReader, LocalWriter};
pub use object::{ObjectBackend, ObjectReader, ObjectWriter};
pub use resolver::Resolver;
pub use retry::RetryPolicy;
pub use traits::{Checksum, Entry, EntryKind, ObjectMeta, OpenMode, ReadStream, WriteStream};
pub use transfer::{Transfer, TransferMode, TransferOptions, TransferStatus};

// Re-export bytes for convenience
pub use bytes::Bytes;
