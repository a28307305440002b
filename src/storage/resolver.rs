//! Storage backend resolution
//!
//! Turns a selector such as `memory://` or `fs:///srv/ftp?create=true` into a
//! live [`StorageHandle`]. Resolution either yields a complete handle or an
//! error; it runs once at startup and never falls back to another backend.

use log::info;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use url::Url;

use crate::error::ResolveError;
use crate::storage::{FilesystemBackend, MemoryBackend, StorageHandle};

/// A selector split into its parts, with the path percent-decoded.
#[derive(Debug, PartialEq, Eq)]
struct Selector {
    backend: String,
    authority: String,
    path: String,
    params: Vec<(String, String)>,
}

fn parse_selector(selector: &str) -> Result<Selector, ResolveError> {
    let selector = selector.trim();
    let malformed = || ResolveError::MalformedSelector(selector.to_string());

    let url = Url::parse(selector).map_err(|_| malformed())?;
    // `fs:/srv` and `mailto:x` parse as URLs but carry no `//` authority part.
    if !url.has_authority() {
        return Err(malformed());
    }

    let path = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|_| malformed())?
        .into_owned();
    let params = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    Ok(Selector {
        backend: url.scheme().to_string(),
        authority: url.authority().to_string(),
        path,
        params,
    })
}

fn parse_bool(backend: &str, key: &str, value: &str) -> Result<bool, ResolveError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ResolveError::InvalidParameter {
            backend: backend.to_string(),
            key: key.to_string(),
            reason: format!("expected a boolean, got '{}'", value),
        }),
    }
}

fn unknown_parameter(backend: &str, key: &str) -> ResolveError {
    ResolveError::InvalidParameter {
        backend: backend.to_string(),
        key: key.to_string(),
        reason: "unknown parameter".into(),
    }
}

fn resolve_memory(selector: &Selector) -> Result<StorageHandle, ResolveError> {
    if !selector.authority.is_empty() || !matches!(selector.path.as_str(), "" | "/") {
        return Err(ResolveError::InvalidParameter {
            backend: "memory".into(),
            key: "path".into(),
            reason: format!(
                "memory backend takes no path, got '{}{}'",
                selector.authority, selector.path
            ),
        });
    }
    if let Some((key, _)) = selector.params.first() {
        return Err(unknown_parameter("memory", key));
    }
    Ok(Arc::new(MemoryBackend::new()))
}

fn resolve_filesystem(selector: &Selector) -> Result<StorageHandle, ResolveError> {
    if !selector.authority.is_empty() {
        return Err(ResolveError::InvalidParameter {
            backend: "fs".into(),
            key: "path".into(),
            reason: format!(
                "root must be absolute, e.g. fs:///srv/ftp, got host '{}'",
                selector.authority
            ),
        });
    }
    if selector.path.is_empty() {
        return Err(ResolveError::InvalidParameter {
            backend: "fs".into(),
            key: "path".into(),
            reason: "a root directory is required, e.g. fs:///srv/ftp".into(),
        });
    }

    let mut create = false;
    for (key, value) in &selector.params {
        match key.as_str() {
            "create" => create = parse_bool("fs", key, value)?,
            other => return Err(unknown_parameter("fs", other)),
        }
    }

    let init_error = |source| ResolveError::BackendInit {
        backend: "fs".into(),
        source,
    };
    if create {
        std::fs::create_dir_all(&selector.path).map_err(init_error)?;
    }
    let backend = FilesystemBackend::open(&selector.path).map_err(init_error)?;
    Ok(Arc::new(backend))
}

/// Resolves a backend selector into a shared storage handle.
pub fn resolve(selector: &str) -> Result<StorageHandle, ResolveError> {
    let parsed = parse_selector(selector)?;
    let handle = match parsed.backend.as_str() {
        "memory" => resolve_memory(&parsed)?,
        "fs" => resolve_filesystem(&parsed)?,
        other => return Err(ResolveError::UnknownBackend(other.to_string())),
    };
    info!("Resolved storage backend '{}'", handle.name());
    Ok(handle)
}
