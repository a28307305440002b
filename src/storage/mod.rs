//! Storage backends
//!
//! A storage backend is anything implementing [`StorageBackend`]. The server
//! resolves one backend at startup from a selector string and shares it with
//! every session as a [`StorageHandle`].

pub mod filesystem;
pub mod memory;
pub mod resolver;
pub mod validation;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StorageError;

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
pub use resolver::resolve;
pub use validation::normalize_path;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Shared, reference-counted handle to the resolved backend.
pub type StorageHandle = Arc<dyn StorageBackend>;

pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;
pub type WriteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

/// A single directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub path: String,
    pub metadata: Metadata,
}

/// Capability set every storage backend provides.
///
/// Paths are virtual, `/`-separated and rooted at the backend root.
/// Implementations must be safe for concurrent use by many sessions.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Short backend name, e.g. `memory` or `fs`.
    fn name(&self) -> &'static str;

    async fn read(&self, path: &str) -> Result<ReadStream>;

    /// Opens a sink replacing the object at `path`.
    async fn write(&self, path: &str) -> Result<WriteSink>;

    /// Lists the direct children of the directory at `path`, sorted by name.
    async fn list(&self, path: &str) -> Result<Vec<Entry>>;

    async fn stat(&self, path: &str) -> Result<Metadata>;

    /// Deletes the file at `path`. Directories are not removed.
    async fn delete(&self, path: &str) -> Result<()>;
}
