//! In-memory [`ResourceProvider`] implementation backed by [`DashMap`].
//!
//! Objects live in a flat namespace keyed by absolute path. Directories may be
//! written with or without a trailing `/`; both name the same directory.
//! Reads and writes go through handles issued by `create_file`/`open_file`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use vaultgate_core::{FileHandle, ResourceProvider, WriteMode};

/// Failures reported by [`MemoryResourceProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    #[error("`{0}` does not exist")]
    NotFound(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("parent directory of `{0}` does not exist")]
    MissingParent(String),
    #[error("`{0}` is a directory")]
    IsDirectory(String),
    #[error("unknown file handle {0}")]
    UnknownHandle(FileHandle),
}

#[derive(Debug, Clone)]
enum Node {
    Directory { mode: WriteMode },
    File { mode: WriteMode, content: Vec<u8> },
}

/// Shared in-process object store.
pub struct MemoryResourceProvider {
    nodes: DashMap<String, Node>,
    handles: DashMap<FileHandle, String>,
    next_handle: AtomicU64,
    latency: Duration,
}

impl MemoryResourceProvider {
    /// Creates a store holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory {
                mode: WriteMode::Through,
            },
        );
        Self {
            nodes,
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
            latency: Duration::ZERO,
        }
    }

    /// Delays every call by `latency`, to simulate a remote backend.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        canonical(path).is_ok_and(|key| self.nodes.contains_key(&key))
    }

    #[must_use]
    pub fn is_directory(&self, path: &str) -> bool {
        canonical(path).is_ok_and(|key| {
            matches!(self.nodes.get(&key).as_deref(), Some(Node::Directory { .. }))
        })
    }

    /// Write mode the object at `path` was created with.
    #[must_use]
    pub fn write_mode(&self, path: &str) -> Option<WriteMode> {
        let key = canonical(path).ok()?;
        self.nodes.get(&key).map(|node| match &*node {
            Node::Directory { mode } | Node::File { mode, .. } => *mode,
        })
    }

    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn require_parent(&self, key: &str) -> Result<(), ProviderError> {
        match self.nodes.get(parent(key)).as_deref() {
            Some(Node::Directory { .. }) => Ok(()),
            _ => Err(ProviderError::MissingParent(key.to_string())),
        }
    }

    fn issue_handle(&self, key: String) -> FileHandle {
        let handle = FileHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.insert(handle, key);
        handle
    }

    fn handle_path(&self, handle: FileHandle) -> Result<String, ProviderError> {
        self.handles
            .get(&handle)
            .map(|path| path.clone())
            .ok_or(ProviderError::UnknownHandle(handle))
    }

    /// Keys of `key` and everything below it.
    fn subtree(&self, key: &str) -> Vec<String> {
        let prefix = format!("{key}/");
        self.nodes
            .iter()
            .filter(|entry| entry.key() == key || entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for MemoryResourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalizes `path` to a map key: absolute, no empty segments, no trailing `/`
/// except for the root itself.
fn canonical(path: &str) -> Result<String, ProviderError> {
    let invalid = || ProviderError::InvalidPath(path.to_string());
    if !path.starts_with('/') {
        return Err(invalid());
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    if trimmed[1..].split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(invalid());
    }
    Ok(trimmed.to_string())
}

fn parent(key: &str) -> &str {
    match key.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &key[..i],
    }
}

#[async_trait]
impl ResourceProvider for MemoryResourceProvider {
    async fn create_directory(&self, path: &str, mode: WriteMode) -> anyhow::Result<()> {
        self.pause().await;
        let key = canonical(path)?;
        self.require_parent(&key)?;

        match self.nodes.entry(key) {
            Entry::Occupied(entry) => match entry.get() {
                Node::Directory { .. } => Ok(()),
                Node::File { .. } => Err(ProviderError::AlreadyExists(entry.key().clone()).into()),
            },
            Entry::Vacant(entry) => {
                debug!(path = %entry.key(), ?mode, "directory created");
                entry.insert(Node::Directory { mode });
                Ok(())
            }
        }
    }

    async fn create_file(&self, path: &str, mode: WriteMode) -> anyhow::Result<FileHandle> {
        self.pause().await;
        let key = canonical(path)?;
        self.require_parent(&key)?;

        match self.nodes.entry(key.clone()) {
            Entry::Occupied(_) => Err(ProviderError::AlreadyExists(key).into()),
            Entry::Vacant(entry) => {
                entry.insert(Node::File {
                    mode,
                    content: Vec::new(),
                });
                let handle = self.issue_handle(key);
                debug!(path, %handle, ?mode, "file created");
                Ok(handle)
            }
        }
    }

    async fn open_file(&self, path: &str) -> anyhow::Result<FileHandle> {
        self.pause().await;
        let key = canonical(path)?;
        match self.nodes.get(&key).as_deref() {
            Some(Node::File { .. }) => {}
            Some(Node::Directory { .. }) => return Err(ProviderError::IsDirectory(key).into()),
            None => return Err(ProviderError::NotFound(key).into()),
        }
        Ok(self.issue_handle(key))
    }

    async fn read(&self, handle: FileHandle) -> anyhow::Result<Bytes> {
        self.pause().await;
        let key = self.handle_path(handle)?;
        match self.nodes.get(&key).as_deref() {
            Some(Node::File { content, .. }) => Ok(Bytes::copy_from_slice(content)),
            _ => Err(ProviderError::NotFound(key).into()),
        }
    }

    async fn write(&self, handle: FileHandle, content: Bytes) -> anyhow::Result<usize> {
        self.pause().await;
        let key = self.handle_path(handle)?;
        match self.nodes.get_mut(&key).as_deref_mut() {
            Some(Node::File { content: existing, .. }) => {
                existing.extend_from_slice(&content);
                Ok(content.len())
            }
            _ => Err(ProviderError::NotFound(key).into()),
        }
    }

    async fn close(&self, handle: FileHandle) -> anyhow::Result<()> {
        self.pause().await;
        self.handles
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| ProviderError::UnknownHandle(handle).into())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.pause().await;
        let key = canonical(path)?;
        if key == "/" {
            return Err(ProviderError::InvalidPath(key).into());
        }
        if !self.nodes.contains_key(&key) {
            return Err(ProviderError::NotFound(key).into());
        }

        let doomed = self.subtree(&key);
        for k in &doomed {
            self.nodes.remove(k);
        }
        debug!(path = %key, removed = doomed.len(), "deleted");
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> anyhow::Result<()> {
        self.pause().await;
        let from = canonical(from)?;
        let to = canonical(to)?;
        if from == "/" || to.starts_with(&format!("{from}/")) {
            return Err(ProviderError::InvalidPath(to).into());
        }
        if !self.nodes.contains_key(&from) {
            return Err(ProviderError::NotFound(from).into());
        }
        if self.nodes.contains_key(&to) {
            return Err(ProviderError::AlreadyExists(to).into());
        }
        self.require_parent(&to)?;

        for old in self.subtree(&from) {
            if let Some((_, node)) = self.nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }
        debug!(%from, %to, "renamed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_error(err: &anyhow::Error) -> &ProviderError {
        err.downcast_ref::<ProviderError>().expect("provider error")
    }

    async fn with_home() -> MemoryResourceProvider {
        let provider = MemoryResourceProvider::new();
        provider.create_directory("/acme/", WriteMode::CacheThrough).await.unwrap();
        provider
            .create_directory("/acme/alice/", WriteMode::CacheThrough)
            .await
            .unwrap();
        provider
    }

    #[test]
    fn canonical_paths() {
        assert_eq!(canonical("/").unwrap(), "/");
        assert_eq!(canonical("/acme/").unwrap(), "/acme");
        assert_eq!(canonical("/acme/alice/a.txt").unwrap(), "/acme/alice/a.txt");
        assert!(canonical("acme").is_err());
        assert!(canonical("/acme//a").is_err());
        assert!(canonical("/acme/../etc").is_err());
    }

    #[test]
    fn parent_of_keys() {
        assert_eq!(parent("/acme"), "/");
        assert_eq!(parent("/acme/alice/a.txt"), "/acme/alice");
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let provider = with_home().await;
        provider.create_directory("/acme", WriteMode::Through).await.unwrap();
        assert!(provider.is_directory("/acme/"));
        assert_eq!(provider.write_mode("/acme"), Some(WriteMode::CacheThrough));
    }

    #[tokio::test]
    async fn create_directory_requires_parent() {
        let provider = MemoryResourceProvider::new();
        let err = provider
            .create_directory("/acme/alice/", WriteMode::CacheThrough)
            .await
            .unwrap_err();
        assert_eq!(
            provider_error(&err),
            &ProviderError::MissingParent("/acme/alice".into())
        );
    }

    #[tokio::test]
    async fn write_then_read_through_handles() {
        let provider = with_home().await;
        let handle = provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap();
        assert_eq!(provider.write(handle, Bytes::from_static(b"hello ")).await.unwrap(), 6);
        assert_eq!(provider.write(handle, Bytes::from_static(b"world")).await.unwrap(), 5);
        provider.close(handle).await.unwrap();

        let reader = provider.open_file("/acme/alice/a.txt").await.unwrap();
        assert_ne!(reader, handle);
        assert_eq!(provider.read(reader).await.unwrap(), Bytes::from_static(b"hello world"));
        provider.close(reader).await.unwrap();
        assert_eq!(provider.open_handles(), 0);
    }

    #[tokio::test]
    async fn create_file_rejects_existing_and_orphans() {
        let provider = with_home().await;
        provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap();

        let err = provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::AlreadyExists(_)));

        let err = provider
            .create_file("/acme/bob/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::MissingParent(_)));
    }

    #[tokio::test]
    async fn open_missing_or_directory_fails() {
        let provider = with_home().await;
        let err = provider.open_file("/acme/alice/nope").await.unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::NotFound(_)));
        let err = provider.open_file("/acme/alice/").await.unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::IsDirectory(_)));
    }

    #[tokio::test]
    async fn closed_handle_is_unknown() {
        let provider = with_home().await;
        let handle = provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap();
        provider.close(handle).await.unwrap();

        let err = provider.read(handle).await.unwrap_err();
        assert_eq!(provider_error(&err), &ProviderError::UnknownHandle(handle));
        assert!(provider.close(handle).await.is_err());
    }

    #[tokio::test]
    async fn delete_directory_removes_subtree() {
        let provider = with_home().await;
        provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap();
        provider.create_directory("/acme/alicebob", WriteMode::CacheThrough).await.unwrap();

        provider.delete("/acme/alice/").await.unwrap();
        assert!(!provider.exists("/acme/alice"));
        assert!(!provider.exists("/acme/alice/a.txt"));
        assert!(provider.exists("/acme/alicebob"));

        let err = provider.delete("/acme/alice").await.unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::NotFound(_)));
        assert!(provider.delete("/").await.is_err());
    }

    #[tokio::test]
    async fn rename_moves_object_and_refuses_overwrite() {
        let provider = with_home().await;
        for name in ["a.txt", "b.txt"] {
            let h = provider
                .create_file(&format!("/acme/alice/{name}"), WriteMode::CacheThrough)
                .await
                .unwrap();
            provider.close(h).await.unwrap();
        }

        let err = provider
            .rename("/acme/alice/a.txt", "/acme/alice/b.txt")
            .await
            .unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::AlreadyExists(_)));

        provider.rename("/acme/alice/a.txt", "/acme/alice/c.txt").await.unwrap();
        assert!(!provider.exists("/acme/alice/a.txt"));
        assert!(provider.exists("/acme/alice/c.txt"));

        let err = provider.rename("/acme/alice/zzz", "/acme/alice/d").await.unwrap_err();
        assert!(matches!(provider_error(&err), ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_directory_carries_children() {
        let provider = with_home().await;
        let h = provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap();
        provider.close(h).await.unwrap();

        provider.rename("/acme/alice", "/acme/alice2").await.unwrap();
        assert!(provider.is_directory("/acme/alice2"));
        assert!(provider.exists("/acme/alice2/a.txt"));

        assert!(provider.rename("/acme/alice2", "/acme/alice2/inner").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_each_call() {
        let provider = MemoryResourceProvider::new().with_latency(Duration::from_millis(40));
        let start = tokio::time::Instant::now();
        provider.create_directory("/acme", WriteMode::CacheThrough).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
