//! Storage configuration.
//!
//! # Example
//!
//! ```toml
//! write_threshold = 8388608
//! chunk_size = 1048576
//! list_page_size = 1000
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 200
//! max_delay_ms = 5000
//!
//! [s3]
//! region = "us-east-1"
//! endpoint = "http://localhost:9000"
//! force_path_style = true
//! allow_http = true
//!
//! [gcs]
//! service_account_path = "~/.config/gcloud/service-account.json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StorageError};

/// Environment variable naming the config file used by [`StorageConfig::from_env`].
pub const CONFIG_ENV: &str = "ANYSTORE_CONFIG";

/// Smallest multipart part S3 accepts (every part but the last).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Top-level storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Spill-buffer size above which object writes switch to multipart upload.
    /// Raised to [`MIN_PART_SIZE`] for network-backed stores.
    #[serde(default = "default_write_threshold")]
    pub write_threshold: usize,

    /// Chunk size for streaming transfers
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Entries fetched per listing page
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub s3: S3Settings,

    #[serde(default)]
    pub gcs: GcsSettings,
}

fn default_write_threshold() -> usize {
    8 * 1024 * 1024 // 8 MiB
}

fn default_chunk_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_list_page_size() -> usize {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_threshold: default_write_threshold(),
            chunk_size: default_chunk_size(),
            list_page_size: default_list_page_size(),
            retry: RetryConfig::default(),
            s3: S3Settings::default(),
            gcs: GcsSettings::default(),
        }
    }
}

/// Retry budget for transient backend failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// S3-compatible client settings shared by every `s3://` bucket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Settings {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (for MinIO, etc.)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style requests (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,

    /// Allow HTTP (non-HTTPS) connections
    #[serde(default)]
    pub allow_http: bool,

    /// Access key ID (optional, uses AWS credential chain if not set)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key (optional)
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            force_path_style: false,
            allow_http: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Google Cloud Storage client settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GcsSettings {
    /// Service account key file; falls back to application default credentials
    #[serde(default)]
    pub service_account_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageError::from_io(e, &path.display().to_string()))?;
        let mut config: StorageConfig = toml::from_str(&content)
            .map_err(|e| StorageError::Config(format!("{}: {}", path.display(), e)))?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from the file named by `ANYSTORE_CONFIG`, or defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(&expand_tilde(Path::new(&path))?),
            None => Ok(Self::default()),
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn expand_paths(&mut self) -> Result<()> {
        if let Some(ref p) = self.gcs.service_account_path {
            self.gcs.service_account_path = Some(expand_tilde(p)?);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(StorageError::Config("chunk_size must be positive".into()));
        }
        if self.list_page_size == 0 {
            return Err(StorageError::Config("list_page_size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(StorageError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir()
            .ok_or_else(|| StorageError::Config("Cannot determine home directory".into()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.write_threshold, 8 * 1024 * 1024);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.s3.region, "us-east-1");
        assert!(config.gcs.service_account_path.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StorageConfig = toml::from_str(
            r#"
            write_threshold = 1024

            [s3]
            endpoint = "http://localhost:9000"
            force_path_style = true
            "#,
        )
        .unwrap();

        assert_eq!(config.write_threshold, 1024);
        assert_eq!(config.list_page_size, 1000);
        assert_eq!(config.s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.s3.force_path_style);
        assert_eq!(config.s3.region, "us-east-1");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("anystore.toml");

        let mut config = StorageConfig::default();
        config.retry.max_attempts = 5;
        config.save(&path).unwrap();

        let loaded = StorageConfig::load(&path).unwrap();
        assert_eq!(loaded.retry.max_attempts, 5);
    }

    #[test]
    fn test_load_rejects_zero_attempts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();

        let err = StorageConfig::load(&path).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config.chunk_size, 1024 * 1024);
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_tilde(Path::new("~/keys/sa.json")).unwrap(),
            home.join("keys/sa.json")
        );
        assert_eq!(
            expand_tilde(Path::new("/abs/sa.json")).unwrap(),
            PathBuf::from("/abs/sa.json")
        );
    }
}
