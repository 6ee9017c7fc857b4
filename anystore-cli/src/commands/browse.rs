use anyhow::{Context, Result};
use anystore::{OpenMode, Resolver, StorageFile, StorageFolder};
use tokio::io::AsyncWriteExt;

use super::format_bytes;

/// List a folder, one entry per line
pub async fn run_ls(resolver: &Resolver, path: &str, recursive: bool) -> Result<()> {
    let folder = StorageFolder::with_resolver(path, resolver)
        .with_context(|| format!("Invalid folder identifier '{}'", path))?;
    let mut listing = folder.list(recursive);

    let mut files = 0u64;
    let mut total = 0u64;
    while let Some(entry) = listing
        .next()
        .await
        .with_context(|| format!("Failed to list {}", folder))?
    {
        if entry.is_folder() {
            println!("{:>12}  {:<19}  {}", "DIR", "", entry.id);
            continue;
        }
        let size = entry.size.unwrap_or(0);
        let modified = entry
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{:>12}  {:<19}  {}", format_bytes(size), modified, entry.id);
        files += 1;
        total += size;
    }

    tracing::debug!("{} file(s), {} total", files, format_bytes(total));
    Ok(())
}

/// Stream a file to stdout
pub async fn run_cat(resolver: &Resolver, path: &str) -> Result<()> {
    let mut file = StorageFile::with_resolver(path, resolver)
        .with_context(|| format!("Invalid file identifier '{}'", path))?;
    let chunk_size = resolver.config().chunk_size;
    let mut stdout = tokio::io::stdout();

    file.open(OpenMode::Read)
        .await
        .with_context(|| format!("Failed to open {}", path))?;
    loop {
        let chunk = file.read(chunk_size).await?;
        if chunk.is_empty() {
            break;
        }
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;
    file.close().await?;
    Ok(())
}

/// Print metadata for a file
pub async fn run_stat(resolver: &Resolver, path: &str) -> Result<()> {
    let mut file = StorageFile::with_resolver(path, resolver)
        .with_context(|| format!("Invalid file identifier '{}'", path))?;
    let meta = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", path))?;
    let checksum = file.checksum().await?;

    println!("Path:       {}", meta.id);
    println!("Backend:    {}", file.backend().name());
    println!("Size:       {} ({} bytes)", format_bytes(meta.size), meta.size);
    if let Some(modified) = meta.last_modified {
        println!("Modified:   {}", modified.to_rfc3339());
    }
    println!("Checksum:   {}", checksum);
    Ok(())
}
