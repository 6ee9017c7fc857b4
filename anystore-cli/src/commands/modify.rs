use anyhow::{Context, Result};
use anystore::{OpenMode, Resolver, StorageError, StorageFile, StorageFolder};
use tokio::io::AsyncReadExt;

use super::{format_bytes, print_report};

/// Store stdin as a file, committing only once stdin is exhausted
pub async fn run_put(resolver: &Resolver, path: &str) -> Result<()> {
    let mut file = StorageFile::with_resolver(path, resolver)
        .with_context(|| format!("Invalid file identifier '{}'", path))?;
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; resolver.config().chunk_size];

    let mut guard = file
        .open_scoped(OpenMode::Write)
        .await
        .with_context(|| format!("Failed to open {} for write", path))?;
    let mut written = 0u64;
    loop {
        let n = stdin.read(&mut buf).await.context("Failed to read stdin")?;
        if n == 0 {
            break;
        }
        guard.write(&buf[..n]).await?;
        written += n as u64;
    }
    guard
        .close()
        .await
        .with_context(|| format!("Failed to commit {}", path))?;

    tracing::info!("Wrote {} to {}", format_bytes(written), path);
    Ok(())
}

/// Delete a file or, recursively, a folder
pub async fn run_rm(resolver: &Resolver, path: &str, recursive: bool) -> Result<()> {
    if recursive {
        let folder = StorageFolder::with_resolver(path, resolver)
            .with_context(|| format!("Invalid folder identifier '{}'", path))?;
        return match folder.delete().await {
            Ok(report) => {
                print_report(&report);
                Ok(())
            }
            Err(StorageError::PartialBatch(report)) => {
                print_report(&report);
                anyhow::bail!("{} of {} deletions failed", report.failures.len(), report.total())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path)),
        };
    }

    let mut file = StorageFile::with_resolver(path, resolver)
        .with_context(|| format!("Invalid file identifier '{}'", path))?;
    file.delete()
        .await
        .with_context(|| format!("Failed to delete {}", path))?;
    tracing::info!("Deleted {}", path);
    Ok(())
}

/// Create a folder
pub async fn run_mkdir(resolver: &Resolver, path: &str) -> Result<()> {
    let folder = StorageFolder::with_resolver(path, resolver)
        .with_context(|| format!("Invalid folder identifier '{}'", path))?;
    folder
        .create()
        .await
        .with_context(|| format!("Failed to create {}", path))?;
    Ok(())
}
