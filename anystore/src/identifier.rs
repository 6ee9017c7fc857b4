//! Storage identifiers.
//!
//! An identifier names a file or folder on one of the supported backends:
//!
//! ```text
//! /var/data/report.csv            local file (bare path)
//! file:///var/data/               local folder
//! gs://bucket/reports/q1.csv      Google Cloud Storage object
//! s3://bucket/reports/            S3 prefix
//! ```
//!
//! # Examples
//!
//! ```
//! use anystore::{Identifier, Scheme};
//!
//! let id = Identifier::parse("s3://bucket//reports/./2024/../q1.csv").unwrap();
//! assert_eq!(id.scheme(), &Scheme::S3);
//! assert_eq!(id.container(), Some("bucket"));
//! assert_eq!(id.to_string(), "s3://bucket/reports/q1.csv");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, StorageError};

/// Storage technology named by an identifier's scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Local filesystem (`file://` or a bare path)
    Local,
    /// Google Cloud Storage (`gs://`)
    Gcs,
    /// Amazon S3 or an S3-compatible store (`s3://`)
    S3,
    /// Any other scheme; parses but has no backend
    Other(String),
}

impl Scheme {
    /// Parse a scheme name, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "file" | "local" => Scheme::Local,
            "gs" | "gcs" => Scheme::Gcs,
            "s3" | "s3a" => Scheme::S3,
            other => Scheme::Other(other.to_string()),
        }
    }

    /// Canonical scheme name.
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Local => "file",
            Scheme::Gcs => "gs",
            Scheme::S3 => "s3",
            Scheme::Other(name) => name,
        }
    }

    /// True for object-store schemes, which require a container.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Scheme::Local)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized identifier of a storage file or folder.
///
/// Path segments never contain empty, `.` or `..` entries. A folder
/// identifier is displayed with a trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    scheme: Scheme,
    container: Option<String>,
    segments: Vec<String>,
    folder: bool,
}

impl Identifier {
    /// Parse identifier text.
    ///
    /// Bare paths use the local scheme; relative paths are resolved against
    /// the current working directory at call time.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(StorageError::MalformedIdentifier(
                "empty identifier".to_string(),
            ));
        }

        match split_scheme(text) {
            Some((name, rest)) => match Scheme::from_name(name) {
                Scheme::Local => Self::local(rest),
                scheme => {
                    let (container, path) = rest.split_once('/').unwrap_or((rest, ""));
                    if container.is_empty() {
                        return Err(StorageError::MalformedIdentifier(format!(
                            "{}: missing container name",
                            text
                        )));
                    }
                    Ok(Self::build(
                        scheme,
                        Some(container.to_string()),
                        Vec::new(),
                        path,
                    ))
                }
            },
            None => Self::local(text),
        }
    }

    /// Build a local identifier from a filesystem path.
    pub fn local(path: &str) -> Result<Self> {
        let base = if path.starts_with('/') {
            Vec::new()
        } else {
            let cwd = std::env::current_dir()?;
            normalize(Vec::new(), &cwd.to_string_lossy())
        };
        Ok(Self::build(Scheme::Local, None, base, path))
    }

    fn build(scheme: Scheme, container: Option<String>, base: Vec<String>, path: &str) -> Self {
        let segments = normalize(base, path);
        let folder = segments.is_empty() || path.ends_with('/');
        Self {
            scheme,
            container,
            segments,
            folder,
        }
    }

    /// Storage scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Bucket or container name (absent for local identifiers).
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Normalized path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when the identifier names a folder / prefix.
    pub fn is_folder(&self) -> bool {
        self.folder
    }

    /// Path within the container, without a leading separator.
    pub fn key(&self) -> String {
        self.segments.join("/")
    }

    /// Last path segment, or the container name at a bucket root.
    pub fn name(&self) -> &str {
        match self.segments.last() {
            Some(last) => last,
            None => self.container.as_deref().unwrap_or(""),
        }
    }

    /// Filesystem path for local identifiers.
    pub fn to_path_buf(&self) -> PathBuf {
        let mut path = PathBuf::from("/");
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }

    /// Same location, marked as a folder.
    pub fn as_folder(&self) -> Self {
        Self {
            folder: true,
            ..self.clone()
        }
    }

    /// Same location, marked as a file. Roots stay folders.
    pub fn as_file(&self) -> Self {
        Self {
            folder: self.segments.is_empty(),
            ..self.clone()
        }
    }

    /// Parent folder. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self {
            scheme: self.scheme.clone(),
            container: self.container.clone(),
            segments,
            folder: true,
        }
    }

    /// Child file identifier; `relative` may contain several segments.
    pub fn join(&self, relative: &str) -> Self {
        let segments = normalize(self.segments.clone(), relative);
        let folder = segments.is_empty() || relative.ends_with('/');
        Self {
            scheme: self.scheme.clone(),
            container: self.container.clone(),
            segments,
            folder,
        }
    }

    /// Child identifier built from already-normalized segments.
    pub(crate) fn child_of(&self, relative: &[String], folder: bool) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.iter().cloned());
        Self {
            scheme: self.scheme.clone(),
            container: self.container.clone(),
            folder: folder || segments.is_empty(),
            segments,
        }
    }

    /// Segments of `self` below `ancestor`, if `ancestor` contains it.
    pub fn relative_to(&self, ancestor: &Identifier) -> Option<&[String]> {
        if self.scheme != ancestor.scheme || self.container != ancestor.container {
            return None;
        }
        self.segments
            .strip_prefix(ancestor.segments.as_slice())
    }

    /// True if both identifiers live in the same store (scheme and bucket).
    pub fn same_store(&self, other: &Identifier) -> bool {
        self.scheme == other.scheme && self.container == other.container
    }
}

fn split_scheme(text: &str) -> Option<(&str, &str)> {
    let (name, rest) = text.split_once("://")?;
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((name, rest))
}

fn normalize(mut segments: Vec<String>, path: &str) -> Vec<String> {
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }
    segments
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}://{}", self.scheme, container)?,
            None if self.scheme != Scheme::Local => write!(f, "{}://", self.scheme)?,
            None => {}
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        if self.folder {
            f.write_str("/")?;
        }
        Ok(())
    }
}

impl FromStr for Identifier {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_string()
    }
}
