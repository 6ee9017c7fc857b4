use anyhow::{Context, Result};
use anystore::{Resolver, StorageConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "anystore")]
#[command(about = "anystore CLI - one set of file commands for local disk, GCS and S3")]
#[command(version)]
struct Cli {
    /// Storage config file (TOML)
    #[arg(long, global = true, env = "ANYSTORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a folder
    Ls {
        /// Folder identifier (gs://, s3://, file:// or a path)
        path: String,

        /// Include every descendant
        #[arg(short, long)]
        recursive: bool,
    },

    /// Write a file to stdout
    Cat {
        path: String,
    },

    /// Store stdin as a file
    Put {
        path: String,
    },

    /// Copy a file, or a folder with --recursive
    Cp {
        source: String,
        destination: String,

        /// Copy a folder
        #[arg(short, long)]
        recursive: bool,

        /// Copy the folder's children straight into the destination
        #[arg(long, requires = "recursive")]
        contents_only: bool,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Move a file, or a folder with --recursive
    Mv {
        source: String,
        destination: String,

        /// Move a folder
        #[arg(short, long)]
        recursive: bool,

        /// Move the folder's children straight into the destination
        #[arg(long, requires = "recursive")]
        contents_only: bool,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete a file, or a folder with --recursive
    Rm {
        path: String,

        /// Delete a folder and everything under it
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show size, modification time and checksum of a file
    Stat {
        path: String,
    },

    /// Create a folder (no-op on object stores)
    Mkdir {
        path: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<StorageConfig> {
    match path {
        Some(path) => StorageConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(StorageConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let resolver = Resolver::new(load_config(cli.config.as_ref())?);

    match cli.command {
        Commands::Ls { path, recursive } => {
            commands::run_ls(&resolver, &path, recursive).await?;
        }
        Commands::Cat { path } => {
            commands::run_cat(&resolver, &path).await?;
        }
        Commands::Put { path } => {
            commands::run_put(&resolver, &path).await?;
        }
        Commands::Cp {
            source,
            destination,
            recursive,
            contents_only,
            timeout,
        } => {
            let request = commands::TransferRequest {
                source,
                destination,
                recursive,
                contents_only,
                timeout,
            };
            commands::run_copy(&resolver, request).await?;
        }
        Commands::Mv {
            source,
            destination,
            recursive,
            contents_only,
            timeout,
        } => {
            let request = commands::TransferRequest {
                source,
                destination,
                recursive,
                contents_only,
                timeout,
            };
            commands::run_move(&resolver, request).await?;
        }
        Commands::Rm { path, recursive } => {
            commands::run_rm(&resolver, &path, recursive).await?;
        }
        Commands::Stat { path } => {
            commands::run_stat(&resolver, &path).await?;
        }
        Commands::Mkdir { path } => {
            commands::run_mkdir(&resolver, &path).await?;
        }
    }

    Ok(())
}
