//! In-memory storage backend
//!
//! Keeps every object in a process-local map. Directories are implicit: a
//! directory exists while at least one object lives below it.

use async_trait::async_trait;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::io::AsyncWrite;

use crate::error::StorageError;
use crate::storage::validation::{file_name, join, normalize_path, parent_of};
use crate::storage::{Entry, Metadata, ReadStream, Result, StorageBackend, WriteSink};

#[derive(Debug, Clone)]
struct Object {
    data: Vec<u8>,
    modified: SystemTime,
}

impl Object {
    fn metadata(&self) -> Metadata {
        Metadata {
            size: self.data.len() as u64,
            is_dir: false,
            modified: Some(self.modified),
        }
    }
}

type ObjectMap = BTreeMap<String, Object>;

fn dir_metadata() -> Metadata {
    Metadata {
        size: 0,
        is_dir: true,
        modified: None,
    }
}

/// A file may not replace a directory or live below another file.
fn check_placement(objects: &ObjectMap, path: &str) -> Result<()> {
    if is_dir(objects, path) {
        return Err(StorageError::IsDirectory(path.to_string()));
    }
    let mut ancestor = parent_of(path);
    while let Some(dir) = ancestor {
        if objects.contains_key(dir) {
            return Err(StorageError::NotADirectory(dir.to_string()));
        }
        ancestor = parent_of(dir);
    }
    Ok(())
}

fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir)
    }
}

fn is_dir(objects: &ObjectMap, path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let prefix = child_prefix(path);
    objects
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(key, _)| key.starts_with(&prefix))
}

/// Process-local backend selected with `memory://`.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<ObjectMap>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> RwLockReadGuard<'_, ObjectMap> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn objects_mut(&self) -> RwLockWriteGuard<'_, ObjectMap> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, path: &str) -> Result<ReadStream> {
        let path = normalize_path(path)?;
        let objects = self.objects();
        match objects.get(&path) {
            Some(object) => Ok(Box::new(Cursor::new(object.data.clone()))),
            None if is_dir(&objects, &path) => Err(StorageError::IsDirectory(path)),
            None => Err(StorageError::NotFound(path)),
        }
    }

    async fn write(&self, path: &str) -> Result<WriteSink> {
        let path = normalize_path(path)?;
        check_placement(&self.objects(), &path)?;

        debug!("Opening in-memory sink for {}", path);
        Ok(Box::new(MemoryWriter {
            path,
            buffer: Vec::new(),
            objects: Arc::clone(&self.objects),
            committed: false,
        }))
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let path = normalize_path(path)?;
        let objects = self.objects();

        if objects.contains_key(&path) {
            return Err(StorageError::NotADirectory(path));
        }
        if !is_dir(&objects, &path) {
            return Err(StorageError::NotFound(path));
        }

        let prefix = child_prefix(&path);
        let mut children: BTreeMap<String, Entry> = BTreeMap::new();
        for (key, object) in objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    children.entry(dir.to_string()).or_insert_with(|| Entry {
                        name: dir.to_string(),
                        path: join(&path, dir),
                        metadata: dir_metadata(),
                    });
                }
                None => {
                    children.insert(
                        rest.to_string(),
                        Entry {
                            name: file_name(key).to_string(),
                            path: key.clone(),
                            metadata: object.metadata(),
                        },
                    );
                }
            }
        }

        Ok(children.into_values().collect())
    }

    async fn stat(&self, path: &str) -> Result<Metadata> {
        let path = normalize_path(path)?;
        let objects = self.objects();
        match objects.get(&path) {
            Some(object) => Ok(object.metadata()),
            None if is_dir(&objects, &path) => Ok(dir_metadata()),
            None => Err(StorageError::NotFound(path)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let mut objects = self.objects_mut();
        if objects.remove(&path).is_some() {
            debug!("Deleted in-memory object {}", path);
            return Ok(());
        }
        if is_dir(&objects, &path) {
            Err(StorageError::IsDirectory(path))
        } else {
            Err(StorageError::NotFound(path))
        }
    }
}

/// Buffers written bytes and publishes them on shutdown.
///
/// A sink dropped without shutdown is an aborted upload and publishes nothing.
struct MemoryWriter {
    path: String,
    buffer: Vec<u8>,
    objects: Arc<RwLock<ObjectMap>>,
    committed: bool,
}

impl MemoryWriter {
    fn commit(&mut self) -> io::Result<()> {
        if self.committed {
            return Ok(());
        }
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        // The tree may have changed since the sink was opened.
        check_placement(&objects, &self.path).map_err(|e| {
            warn!("Discarding upload to {}: {}", self.path, e);
            io::Error::new(io::ErrorKind::AlreadyExists, e.to_string())
        })?;
        self.committed = true;
        let object = Object {
            data: std::mem::take(&mut self.buffer),
            modified: SystemTime::now(),
        };
        objects.insert(self.path.clone(), object);
        Ok(())
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.committed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "sink already closed",
            )));
        }
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.commit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn put(backend: &MemoryBackend, path: &str, data: &[u8]) {
        let mut sink = backend.write(path).await.unwrap();
        sink.write_all(data).await.unwrap();
        sink.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn write_is_visible_after_shutdown() {
        let backend = MemoryBackend::new();
        let mut sink = backend.write("/a.txt").await.unwrap();
        sink.write_all(b"hello").await.unwrap();
        assert!(backend.stat("/a.txt").await.unwrap_err().is_not_found());

        sink.shutdown().await.unwrap();
        let mut out = String::new();
        backend
            .read("a.txt")
            .await
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn implicit_directories_are_listed_once() {
        let backend = MemoryBackend::new();
        put(&backend, "/docs/b.txt", b"b").await;
        put(&backend, "/docs/a.txt", b"aa").await;
        put(&backend, "/docs/img/x.png", b"x").await;
        put(&backend, "/docs-other", b"").await;

        let names: Vec<_> = backend
            .list("/docs")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.metadata.is_dir))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a.txt".to_string(), false),
                ("b.txt".to_string(), false),
                ("img".to_string(), true),
            ]
        );
        assert!(backend.stat("/docs/img").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn file_cannot_become_a_directory() {
        let backend = MemoryBackend::new();
        put(&backend, "/a", b"file").await;
        assert!(matches!(
            backend.write("/a/b").await,
            Err(StorageError::NotADirectory(_))
        ));
        assert!(matches!(
            backend.list("/a").await,
            Err(StorageError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn dropped_sink_publishes_nothing() {
        let backend = MemoryBackend::new();
        let mut sink = backend.write("/up.bin").await.unwrap();
        sink.write_all(b"half").await.unwrap();
        drop(sink);

        assert!(backend.stat("/up.bin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn conflicting_sinks_keep_the_tree_consistent() {
        let backend = MemoryBackend::new();
        let mut parent = backend.write("/a").await.unwrap();
        parent.write_all(b"file").await.unwrap();

        put(&backend, "/a/b", b"child").await;
        assert!(parent.shutdown().await.is_err());

        assert!(backend.stat("/a").await.unwrap().is_dir);
        assert_eq!(backend.stat("/a/b").await.unwrap().size, 5);
        assert_eq!(backend.list("/a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_created_under_pending_directory_is_refused() {
        let backend = MemoryBackend::new();
        let mut child = backend.write("/x/y").await.unwrap();
        child.write_all(b"y").await.unwrap();

        put(&backend, "/x", b"now a file").await;
        assert!(child.shutdown().await.is_err());

        assert!(!backend.stat("/x").await.unwrap().is_dir);
        assert!(backend.stat("/x/y").await.unwrap_err().is_not_found());
    }
}
