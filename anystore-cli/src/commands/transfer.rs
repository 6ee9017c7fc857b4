use anyhow::{Context, Result};
use anystore::{
    BatchReport, Identifier, Resolver, StorageError, StorageFile, StorageFolder, TransferOptions,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{format_bytes, print_report};

/// Arguments shared by `cp` and `mv`
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
    pub recursive: bool,
    pub contents_only: bool,
    pub timeout: Option<u64>,
}

impl TransferRequest {
    fn options(&self, resolver: &Resolver) -> TransferOptions {
        let mut options = TransferOptions::from_config(resolver.config());
        if let Some(secs) = self.timeout {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        options.with_cancel(cancel_on_ctrl_c())
    }
}

/// Token cancelled by the first Ctrl-C; transfers stop between chunks.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling after the current chunk");
            child.cancel();
        }
    });
    token
}

fn finish_batch(result: anystore::Result<BatchReport>, what: &str) -> Result<()> {
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(StorageError::PartialBatch(report)) => {
            print_report(&report);
            anyhow::bail!("{} of {} {} operations failed", report.failures.len(), report.total(), what)
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy a file or folder between any two backends
pub async fn run_copy(resolver: &Resolver, request: TransferRequest) -> Result<()> {
    let options = request.options(resolver);
    let dest = Identifier::parse(&request.destination)
        .with_context(|| format!("Invalid destination '{}'", request.destination))?;

    if request.recursive {
        let folder = StorageFolder::with_resolver(&request.source, resolver)
            .with_context(|| format!("Invalid source '{}'", request.source))?;
        let result = folder.copy_to_with(&dest, request.contents_only, &options).await;
        return finish_batch(result, "copy");
    }

    let file = StorageFile::with_resolver(&request.source, resolver)
        .with_context(|| format!("Invalid source '{}'", request.source))?;
    let transfer = file
        .copy_to_with(&dest, &options)
        .await
        .with_context(|| format!("Failed to copy {} to {}", request.source, request.destination))?;

    tracing::info!(
        "Copied {} ({}{})",
        transfer,
        format_bytes(transfer.bytes_transferred()),
        if transfer.is_native() { ", native" } else { "" }
    );
    Ok(())
}

/// Move a file or folder between any two backends
pub async fn run_move(resolver: &Resolver, request: TransferRequest) -> Result<()> {
    let options = request.options(resolver);
    let dest = Identifier::parse(&request.destination)
        .with_context(|| format!("Invalid destination '{}'", request.destination))?;

    if request.recursive {
        let folder = StorageFolder::with_resolver(&request.source, resolver)
            .with_context(|| format!("Invalid source '{}'", request.source))?;
        let result = folder.move_to_with(&dest, request.contents_only, &options).await;
        return finish_batch(result, "move");
    }

    let mut file = StorageFile::with_resolver(&request.source, resolver)
        .with_context(|| format!("Invalid source '{}'", request.source))?;
    let transfer = file
        .move_to_with(&dest, &options)
        .await
        .with_context(|| format!("Failed to move {} to {}", request.source, request.destination))?;

    tracing::info!("Moved {} ({})", transfer, format_bytes(transfer.bytes_transferred()));
    Ok(())
}
