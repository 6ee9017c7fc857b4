//! Copy and move between any two identifiers.
//!
//! Within one store the backend's native copy or rename is tried first.
//! Otherwise, or when the native primitive is unavailable, the source is
//! streamed into the destination in fixed-size chunks.

use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::Backend;
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::identifier::Identifier;
use crate::resolver::Resolver;
use crate::traits::{ReadStream, WriteStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    /// Copy, then delete the source
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// Knobs for a single transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Bytes per streamed chunk
    pub chunk_size: usize,
    /// Deadline for the whole transfer
    pub timeout: Option<Duration>,
    /// Checked between chunks
    pub cancel: CancellationToken,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

impl TransferOptions {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One copy or move and its outcome.
#[derive(Debug, Clone)]
pub struct Transfer {
    source: Identifier,
    destination: Identifier,
    mode: TransferMode,
    status: TransferStatus,
    bytes_transferred: u64,
    native: bool,
}

impl Transfer {
    pub fn new(source: Identifier, destination: Identifier, mode: TransferMode) -> Self {
        Self {
            source,
            destination,
            mode,
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            native: false,
        }
    }

    pub fn source(&self) -> &Identifier {
        &self.source
    }

    pub fn destination(&self) -> &Identifier {
        &self.destination
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Bytes written to the destination.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// True when a backend-native copy or rename did the work.
    pub fn is_native(&self) -> bool {
        self.native
    }

    /// Run the transfer to completion.
    ///
    /// A move across stores deletes the source only after the destination
    /// has been committed. Re-running a failed transfer overwrites the
    /// destination.
    #[instrument(skip(self, resolver, options), fields(from = %self.source, to = %self.destination, mode = ?self.mode))]
    pub async fn run(&mut self, resolver: &Resolver, options: &TransferOptions) -> Result<()> {
        self.status = TransferStatus::InProgress;
        self.bytes_transferred = 0;
        self.native = false;

        let result = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute(resolver, options)).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(format!(
                    "{} -> {} exceeded {:?}",
                    self.source, self.destination, limit
                ))),
            },
            None => self.execute(resolver, options).await,
        };

        match &result {
            Ok(()) => {
                self.status = TransferStatus::Done;
                info!(bytes = self.bytes_transferred, native = self.native, "transfer complete");
            }
            Err(e) => {
                self.status = TransferStatus::Failed;
                warn!("transfer failed: {}", e);
            }
        }
        result
    }

    async fn execute(&mut self, resolver: &Resolver, options: &TransferOptions) -> Result<()> {
        if self.source == self.destination {
            debug!("source and destination are identical, nothing to do");
            return Ok(());
        }

        let source = resolver.resolve_backend(&self.source)?;
        let destination = resolver.resolve_backend(&self.destination)?;

        if self.source.same_store(&self.destination) && self.try_native(&source, &destination).await? {
            return Ok(());
        }

        self.stream(&source, &destination, options).await?;

        if self.mode == TransferMode::Move {
            source.delete(&self.source).await?;
        }
        Ok(())
    }

    /// Returns false when the caller should fall back to streaming.
    async fn try_native(&mut self, source: &Backend, destination: &Backend) -> Result<bool> {
        let outcome = match self.mode {
            TransferMode::Copy => source.copy(&self.source, &self.destination).await,
            TransferMode::Move => source.rename(&self.source, &self.destination).await,
        };

        match outcome {
            Ok(()) => {
                self.native = true;
                self.bytes_transferred = match destination.head(&self.destination).await {
                    Ok(meta) => meta.size,
                    Err(_) => 0,
                };
                Ok(true)
            }
            Err(e) if e.is_not_supported() || e.is_transient() => {
                warn!("native {:?} unavailable, streaming instead: {}", self.mode, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn stream(&mut self, source: &Backend, destination: &Backend, options: &TransferOptions) -> Result<()> {
        let mut reader = source.open_read(&self.source).await?;
        let mut writer = destination.open_write(&self.destination).await?;
        debug!(chunk_size = options.chunk_size, "streaming");

        let chunk_size = options.chunk_size.max(1);
        let copied = async {
            loop {
                if options.cancel.is_cancelled() {
                    return Err(StorageError::Cancelled(format!(
                        "{} -> {}",
                        self.source, self.destination
                    )));
                }
                let chunk = reader.read(chunk_size).await?;
                if chunk.is_empty() {
                    break;
                }
                writer.write(&chunk).await?;
                self.bytes_transferred += chunk.len() as u64;
            }
            writer.commit().await
        }
        .await;

        if let Err(e) = reader.close().await {
            debug!("error closing source: {}", e);
        }

        match copied {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!("failed to abort destination write: {}", abort);
                }
                match e {
                    StorageError::Cancelled(_) => Err(e),
                    cause => Err(StorageError::Transfer {
                        source_uri: self.source.to_string(),
                        destination: self.destination.to_string(),
                        bytes_transferred: self.bytes_transferred,
                        cause: Box::new(cause),
                    }),
                }
            }
        }
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.mode {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        };
        write!(f, "{} {} -> {}", verb, self.source, self.destination)
    }
}
