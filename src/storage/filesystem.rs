//! Local filesystem storage backend
//!
//! Maps virtual paths onto a root directory on disk.

use async_trait::async_trait;
use log::{error, info, warn};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::StorageError;
use crate::storage::validation::{join, normalize_path};
use crate::storage::{Entry, Metadata, ReadStream, Result, StorageBackend, WriteSink};

/// Backend selected with `fs:///some/root`.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Opens a backend rooted at `root`, which must be an existing directory.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let root = root.canonicalize()?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }
        info!("Filesystem storage root: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Converts a virtual path to a real path under the root, lexically.
    fn real_path(&self, virtual_path: &str) -> Result<(String, PathBuf)> {
        let virtual_path = normalize_path(virtual_path)?;
        let relative = virtual_path.trim_start_matches('/');
        let real = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        };
        Ok((virtual_path, real))
    }

    /// Like `real_path`, but follows symlinks and refuses anything that lands
    /// outside the root. Missing trailing components are kept as they are.
    async fn confined_path(&self, virtual_path: &str) -> Result<(String, PathBuf)> {
        let (virtual_path, real) = self.real_path(virtual_path)?;
        let mut existing = real.as_path();
        let mut missing: Vec<OsString> = Vec::new();

        loop {
            match fs::canonicalize(existing).await {
                Ok(canonical) => {
                    if !canonical.starts_with(&self.root) {
                        warn!("Rejected {}: resolves outside the storage root", virtual_path);
                        return Err(StorageError::InvalidPath(virtual_path));
                    }
                    let confined = missing
                        .iter()
                        .rev()
                        .fold(canonical, |path, name| path.join(name));
                    return Ok((virtual_path, confined));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // A dangling link would be followed by create, wherever it points.
                    if fs::symlink_metadata(existing).await.is_ok() {
                        warn!("Rejected {}: dangling symlink", virtual_path);
                        return Err(StorageError::InvalidPath(virtual_path));
                    }
                    match (existing.parent(), existing.file_name()) {
                        (Some(parent), Some(name)) => {
                            missing.push(name.to_os_string());
                            existing = parent;
                        }
                        _ => return Err(StorageError::from_io(&virtual_path, e)),
                    }
                }
                Err(e) => return Err(StorageError::from_io(&virtual_path, e)),
            }
        }
    }
}

fn to_metadata(metadata: &std::fs::Metadata) -> Metadata {
    Metadata {
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        is_dir: metadata.is_dir(),
        modified: metadata.modified().ok(),
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn read(&self, path: &str) -> Result<ReadStream> {
        let (virtual_path, real) = self.confined_path(path).await?;
        let metadata = fs::metadata(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        if metadata.is_dir() {
            return Err(StorageError::IsDirectory(virtual_path));
        }
        let file = fs::File::open(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        Ok(Box::new(file))
    }

    async fn write(&self, path: &str) -> Result<WriteSink> {
        let (virtual_path, real) = self.confined_path(path).await?;
        match fs::metadata(&real).await {
            Ok(metadata) if metadata.is_dir() => {
                return Err(StorageError::IsDirectory(virtual_path));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::from_io(&virtual_path, e)),
        }
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create parent of {}: {}", virtual_path, e);
                StorageError::from_io(&virtual_path, e)
            })?;
        }
        let file = fs::File::create(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        Ok(Box::new(file))
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let (virtual_path, real) = self.confined_path(path).await?;
        let metadata = fs::metadata(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(virtual_path));
        }
        let mut dir = fs::read_dir(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = match entry.metadata().await {
                Ok(metadata) => to_metadata(&metadata),
                Err(_) => continue,
            };
            entries.push(Entry {
                path: join(&virtual_path, &name),
                name,
                metadata,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Metadata> {
        let (virtual_path, real) = self.confined_path(path).await?;
        let metadata = fs::metadata(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        Ok(to_metadata(&metadata))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (virtual_path, target) = self.confined_path(path).await?;
        let metadata = fs::metadata(&target)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        if metadata.is_dir() {
            return Err(StorageError::IsDirectory(virtual_path));
        }
        // Unlink the entry itself; a symlink goes, its target stays.
        let (_, real) = self.real_path(&virtual_path)?;
        fs::remove_file(&real)
            .await
            .map_err(|e| StorageError::from_io(&virtual_path, e))?;
        info!("Deleted file {} (real: {})", virtual_path, real.display());
        Ok(())
    }
}
