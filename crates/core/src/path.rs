//! Path parsing and key resolution
//!
//! Remote addresses have the format `s3://bucket[/key]`. Anything else is a
//! local path. [`KeyResolver`] maps both sides of a sync onto relative keys,
//! the `/`-delimited join key shared by local files and remote objects.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

const SCHEME: &str = "s3://";

/// A parsed remote path pointing to an S3 location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    /// Bucket name
    pub bucket: String,
    /// Object key or prefix (empty for bucket root)
    pub key: String,
}

impl RemotePath {
    /// Create a new RemotePath
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether the key denotes a prefix rather than a single object
    pub fn is_dir(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Last component of the key, if any
    pub fn file_name(&self) -> Option<&str> {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    /// Join a child path component
    pub fn join(&self, child: &str) -> Self {
        let base = self.key.trim_end_matches('/');
        let key = if base.is_empty() {
            child.to_string()
        } else {
            format!("{base}/{child}")
        };
        Self {
            bucket: self.bucket.clone(),
            key,
        }
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.key)
    }
}

/// Parsed address that can be either local or remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    /// Local filesystem path
    Local(PathBuf),
    /// Remote S3 path
    Remote(RemotePath),
}

impl ParsedPath {
    /// Check if this is a remote path
    pub fn is_remote(&self) -> bool {
        matches!(self, ParsedPath::Remote(_))
    }

    /// Get the remote path if this is a remote path
    pub fn as_remote(&self) -> Option<&RemotePath> {
        match self {
            ParsedPath::Remote(p) => Some(p),
            ParsedPath::Local(_) => None,
        }
    }

    /// Get the local path if this is a local path
    pub fn as_local(&self) -> Option<&Path> {
        match self {
            ParsedPath::Local(p) => Some(p),
            ParsedPath::Remote(_) => None,
        }
    }
}

/// Whether a string uses the `s3://` scheme (case-insensitive)
pub fn is_remote_address(address: &str) -> bool {
    address
        .get(..SCHEME.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(SCHEME))
}

/// Parse an address string into a ParsedPath
///
/// `s3://bucket/key` and `S3://bucket/key` are remote; `s3://bucket` is the
/// bucket root. Everything else is a local path.
pub fn parse_address(address: &str) -> Result<ParsedPath> {
    if address.is_empty() {
        return Err(Error::InvalidAddress("address cannot be empty".into()));
    }

    if !is_remote_address(address) {
        return Ok(ParsedPath::Local(PathBuf::from(address)));
    }

    parse_remote(address).map(ParsedPath::Remote)
}

/// Parse an address that must be remote
pub fn parse_remote(address: &str) -> Result<RemotePath> {
    if !is_remote_address(address) {
        return Err(Error::InvalidAddress(format!(
            "'{address}' is not an S3 URL. Use format: s3://bucket[/key]"
        )));
    }

    let rest = &address[SCHEME.len()..];
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));

    if bucket.is_empty() {
        return Err(Error::InvalidAddress(format!(
            "'{address}' is missing a bucket name"
        )));
    }

    Ok(RemotePath::new(bucket, key))
}

/// Maps local paths and remote keys onto relative keys for one sync pair
#[derive(Debug, Clone)]
pub struct KeyResolver {
    local_root: PathBuf,
    remote: RemotePath,
    prefix: String,
}

impl KeyResolver {
    /// Create a resolver for a local root and a remote bucket/prefix
    ///
    /// A non-empty prefix is treated as a directory, so `photos` and
    /// `photos/` resolve identically.
    pub fn new(local_root: impl Into<PathBuf>, remote: RemotePath) -> Result<Self> {
        let local_root = local_root.into();
        if local_root.as_os_str().is_empty() {
            return Err(Error::InvalidAddress("local root cannot be empty".into()));
        }
        if remote.bucket.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "'{remote}' is missing a bucket name"
            )));
        }

        let trimmed = remote.key.trim_start_matches('/');
        let prefix = if trimmed.is_empty() || trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };

        Ok(Self {
            local_root,
            remote,
            prefix,
        })
    }

    /// Local root directory
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Remote bucket and prefix as given
    pub fn remote(&self) -> &RemotePath {
        &self.remote
    }

    /// Normalized remote prefix (empty or ending in `/`)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Relative key for a path under the local root
    pub fn relative_key(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.local_root).map_err(|_| {
            Error::InvalidAddress(format!(
                "{} is not under {}",
                path.display(),
                self.local_root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(Error::InvalidAddress(format!(
                        "{} escapes the sync root",
                        path.display()
                    )));
                }
            }
        }

        Ok(normalize_key(&parts.join("/")))
    }

    /// Local path for a relative key
    pub fn local_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.local_root.clone(), |path, part| path.join(part))
    }

    /// Full object key for a relative key
    pub fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, normalize_key(key))
    }

    /// Remote path for a relative key
    pub fn remote_path(&self, key: &str) -> RemotePath {
        RemotePath::new(&self.remote.bucket, self.remote_key(key))
    }

    /// Relative key for an object key from a listing
    ///
    /// Returns `None` for keys outside the prefix and for directory markers.
    /// The remainder is kept byte-exact so distinct objects never share a
    /// relative key.
    pub fn key_from_remote(&self, object_key: &str) -> Option<String> {
        let relative = object_key.strip_prefix(&self.prefix)?;
        if relative.is_empty() || relative.ends_with('/') {
            return None;
        }
        Some(relative.to_string())
    }
}

/// Turn platform separators into `/` and strip a single leading separator
pub fn normalize_key(key: &str) -> String {
    let key = if std::path::MAIN_SEPARATOR == '/' {
        key.to_string()
    } else {
        key.replace(std::path::MAIN_SEPARATOR, "/")
    };
    key.strip_prefix('/').map(str::to_string).unwrap_or(key)
}
