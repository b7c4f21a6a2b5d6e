use crate::error::{ClientError, Result};
use crate::targets::Cluster;
use cwlsubmit_core::{
    constants::prefixes,
    errors::{ConfigError, DomainError},
    manifest::StorageAddress,
};
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Fetches the raw text of a document by absolute URI.
pub trait DocumentLoader: Send + Sync {
    fn fetch_text(&self, uri: &str) -> Result<String>;
}

/// Serves `file://` URIs from the local filesystem and `storage:` URIs from
/// the cluster's storage.
pub struct FsLoader {
    storage: Option<Arc<dyn Cluster>>,
}

impl FsLoader {
    pub fn new() -> Self {
        Self { storage: None }
    }

    pub fn with_storage(storage: Arc<dyn Cluster>) -> Self {
        Self {
            storage: Some(storage),
        }
    }
}

impl Default for FsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for FsLoader {
    fn fetch_text(&self, uri: &str) -> Result<String> {
        let uri = defrag(uri);
        if StorageAddress::is_storage_ref(uri) {
            let address = StorageAddress::parse(uri)?;
            let storage = self.storage.as_ref().ok_or_else(|| {
                ClientError::Config(ConfigError::General(format!(
                    "Cannot load '{}' without a cluster connection",
                    uri
                )))
            })?;
            let path = address.path.as_deref().unwrap_or_default();
            let data = storage.read_file(&address.pdh, path)?;
            return String::from_utf8(data).map_err(|_| {
                ClientError::Domain(DomainError::InvalidReference {
                    reference: uri.to_string(),
                    reason: "document is not valid UTF-8".to_string(),
                })
            });
        }

        let path = file_uri_to_path(uri)?;
        fs_err::read_to_string(&path).map_err(|source| {
            ClientError::Config(ConfigError::PathIo {
                path: path.clone(),
                source,
            })
        })
    }
}

fn invalid_reference(reference: &str, reason: impl Into<String>) -> ClientError {
    ClientError::Domain(DomainError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    })
}

/// Strips a `#fragment`.
pub fn defrag(uri: &str) -> &str {
    uri.split('#').next().unwrap_or(uri)
}

pub fn fragment(uri: &str) -> Option<&str> {
    uri.split_once('#').map(|(_, frag)| frag)
}

/// Resolves `reference` against `base` the way relative links resolve in a
/// document. Storage addresses and absolute URIs are returned unchanged.
pub fn resolve(base: &str, reference: &str) -> Result<String> {
    if reference.starts_with(prefixes::STORAGE) || reference.starts_with(prefixes::ANONYMOUS) {
        return Ok(reference.to_string());
    }
    if let Ok(absolute) = Url::parse(reference) {
        return Ok(absolute.to_string());
    }
    if reference.starts_with('#') {
        return Ok(format!("{}{}", defrag(base), reference));
    }
    if let Some(base_address) = base.strip_prefix(prefixes::STORAGE) {
        let dir = defrag(base_address)
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or(defrag(base_address));
        return Ok(format!("{}{}/{}", prefixes::STORAGE, dir, reference));
    }
    let base_url = Url::parse(base).map_err(|e| invalid_reference(base, e.to_string()))?;
    let joined = base_url
        .join(reference)
        .map_err(|e| invalid_reference(reference, e.to_string()))?;
    Ok(joined.to_string())
}

pub fn path_to_uri(path: &Path) -> Result<String> {
    let absolute = fs_err::canonicalize(path).map_err(|source| {
        ClientError::Config(ConfigError::PathIo {
            path: path.to_path_buf(),
            source,
        })
    })?;
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| ClientError::InvalidPath {
            path: absolute,
            reason: "cannot be expressed as a file:// URI".to_string(),
        })
}

/// `file://` URI of the current directory, with a trailing slash so relative
/// references resolve inside it.
pub fn cwd_uri() -> Result<String> {
    let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
    Url::from_directory_path(&cwd)
        .map(|u| u.to_string())
        .map_err(|_| ClientError::InvalidPath {
            path: cwd,
            reason: "cannot be expressed as a file:// URI".to_string(),
        })
}

pub fn file_uri_to_path(uri: &str) -> Result<std::path::PathBuf> {
    let url = Url::parse(defrag(uri)).map_err(|e| invalid_reference(uri, e.to_string()))?;
    if url.scheme() != "file" {
        return Err(invalid_reference(uri, "not a file:// URI"));
    }
    url.to_file_path()
        .map_err(|_| invalid_reference(uri, "not a local path"))
}

pub fn is_local(uri: &str) -> bool {
    uri.starts_with("file://")
}

pub fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}
