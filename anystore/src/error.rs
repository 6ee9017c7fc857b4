//! Storage error types.

use std::error::Error as _;
use std::fmt;
use std::io;
use thiserror::Error;

/// Storage operation errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Identifier text could not be parsed
    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    /// No backend is registered for the scheme
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Operation is not valid in the file's current open state
    #[error("Invalid state: {0}")]
    State(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Credentials were rejected or could not be obtained
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Timeout, server error or throttling that outlived the retry budget
    #[error("Transient network error after {attempts} attempt(s): {message}")]
    Transient { message: String, attempts: u32 },

    /// Streaming transfer failed part way through
    #[error("Transfer {source_uri} -> {destination} failed after {bytes_transferred} bytes: {cause}")]
    Transfer {
        source_uri: String,
        destination: String,
        bytes_transferred: u64,
        cause: Box<StorageError>,
    },

    /// Folder-level operation where some children failed
    #[error("{0}")]
    PartialBatch(BatchReport),

    /// I/O error during storage operation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Path already exists
    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Cancelled through a cancellation token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Caller-imposed deadline elapsed
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification of a [`StorageError`], suitable for branching and
/// for per-child batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedIdentifier,
    UnsupportedScheme,
    State,
    NotFound,
    Auth,
    PermissionDenied,
    Transient,
    Transfer,
    PartialBatch,
    Io,
    AlreadyExists,
    NotSupported,
    Config,
    Backend,
    Cancelled,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedIdentifier => "malformed-identifier",
            ErrorKind::UnsupportedScheme => "unsupported-scheme",
            ErrorKind::State => "state",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Auth => "auth",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Transient => "transient",
            ErrorKind::Transfer => "transfer",
            ErrorKind::PartialBatch => "partial-batch",
            ErrorKind::Io => "io",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::Config => "config",
            ErrorKind::Backend => "backend",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

impl StorageError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::MalformedIdentifier(_) => ErrorKind::MalformedIdentifier,
            StorageError::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            StorageError::State(_) => ErrorKind::State,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Auth(_) => ErrorKind::Auth,
            StorageError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            StorageError::Transient { .. } => ErrorKind::Transient,
            StorageError::Transfer { .. } => ErrorKind::Transfer,
            StorageError::PartialBatch(_) => ErrorKind::PartialBatch,
            StorageError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                _ => ErrorKind::Io,
            },
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::NotSupported(_) => ErrorKind::NotSupported,
            StorageError::Config(_) => ErrorKind::Config,
            StorageError::Backend(_) => ErrorKind::Backend,
            StorageError::Cancelled(_) => ErrorKind::Cancelled,
            StorageError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this is a permission error.
    pub fn is_permission_denied(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }

    /// Check if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transient { .. } => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Check if this is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, StorageError::Auth(_))
    }

    /// Check if the backend reported the operation as unsupported.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, StorageError::NotSupported(_))
    }

    /// Build a transient error that has not been retried yet.
    pub fn transient(message: impl Into<String>) -> Self {
        StorageError::Transient {
            message: message.into(),
            attempts: 1,
        }
    }

    /// Map an I/O error for `path` onto the storage taxonomy.
    pub(crate) fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_string()),
            _ => StorageError::Io(err),
        }
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        use object_store::Error as OsError;

        match err {
            OsError::NotFound { path, .. } => StorageError::NotFound(path),
            OsError::PermissionDenied { path, .. } => StorageError::PermissionDenied(path),
            OsError::Unauthenticated { path, source } => {
                StorageError::Auth(format!("{}: {}", path, source))
            }
            OsError::AlreadyExists { path, .. } => StorageError::AlreadyExists(path),
            OsError::NotSupported { source } => StorageError::NotSupported(source.to_string()),
            OsError::NotImplemented => {
                StorageError::NotSupported("not implemented by store".to_string())
            }
            // The HTTP client folds both server-side failures and rejected
            // requests into `Generic`; only the former are worth retrying.
            OsError::Generic { store, source } => {
                let mut message = format!("{}: {}", store, source);
                let mut cause = source.source();
                while let Some(err) = cause {
                    message.push_str(": ");
                    message.push_str(&err.to_string());
                    cause = err.source();
                }
                if is_transient_message(&message) {
                    StorageError::transient(message)
                } else {
                    StorageError::Backend(message)
                }
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Whether a generic store failure describes a condition that may clear up.
///
/// An explicit HTTP status wins: 5xx, 408 and 429 are transient, anything
/// else is not. Without one, network-level failures are transient.
fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if let Some(status) = http_status(&lower) {
        return status >= 500 || status == 408 || status == 429;
    }
    const MARKERS: &[&str] = &[
        "timeout",
        "timed out",
        "connection",
        "error sending request",
        "broken pipe",
        "reset by peer",
        "slowdown",
        "slow down",
        "too many requests",
        "throttl",
        "service unavailable",
        "internal error",
    ];
    MARKERS.iter().any(|marker| lower.contains(marker))
        || ["500", "502", "503", "504"].iter().any(|code| lower.contains(code))
}

/// Status code following the word "status" in a lower-cased message.
fn http_status(lower: &str) -> Option<u16> {
    lower.match_indices("status").find_map(|(at, word)| {
        let rest = lower[at + word.len()..].trim_start_matches([' ', ':', '=']);
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        match digits.len() {
            3 => digits.parse().ok(),
            _ => None,
        }
    })
}

/// Outcome of a folder-level batch operation.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Name of the operation ("copy", "move", "delete")
    pub operation: String,
    /// Children that completed
    pub succeeded: Vec<String>,
    /// Children that failed
    pub failures: Vec<BatchFailure>,
}

/// A single failed child of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl BatchReport {
    pub(crate) fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, path: String, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.succeeded.push(path),
            Err(e) => {
                tracing::warn!(path = %path, kind = %e.kind(), "batch {} failed: {}", self.operation, e);
                self.failures.push(BatchFailure {
                    path,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Total number of children attempted.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    /// True when every child succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Return `Ok(self)` if nothing failed, otherwise a `PartialBatch` error.
    pub fn into_result(self) -> Result<BatchReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StorageError::PartialBatch(self))
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} of {} path(s)",
            self.operation,
            self.failures.len(),
            self.total()
        )?;
        for failure in &self.failures {
            write!(f, "; {} ({})", failure.path, failure.kind)?;
        }
        Ok(())
    }
}
