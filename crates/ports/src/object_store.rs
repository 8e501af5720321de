//! Object storage trait, in-memory and filesystem implementations.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{PortError, Result};
use crate::sync::lock;

/// Flat key/value object storage with `/`-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `key`, replacing any existing object.
    async fn upload(&self, key: &str, content_type: Option<&str>, body: Vec<u8>) -> Result<()>;

    /// Lists up to `limit` keys starting with `prefix`, in key order.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;

    /// Reads an object.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Downloads `keys` into `dest`. Each file lands at the key with
    /// `strip_prefix` removed.
    async fn download(&self, keys: &[String], dest: &Path, strip_prefix: &str) -> Result<()> {
        for key in keys {
            let relative = key.strip_prefix(strip_prefix).unwrap_or(key);
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let path = resolve_key(dest, relative)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let body = self.get(key).await?;
            tokio::fs::write(&path, body).await?;
        }
        Ok(())
    }
}

/// Maps a key to a path under `root`, rejecting keys that would escape it.
fn resolve_key(root: &Path, key: &str) -> Result<PathBuf> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(PortError::InvalidKey(key.to_string()));
    }
    let relative = Path::new(key);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(PortError::InvalidKey(key.to_string()));
    }
    Ok(root.join(relative))
}

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: Option<String>,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct InMemoryObjectState {
    objects: BTreeMap<String, StoredObject>,
    uploads: usize,
    fail_uploads: bool,
}

/// In-memory object store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<InMemoryObjectState>>,
}

impl InMemoryObjectStore {
    /// Creates a new empty object store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object without counting it as an upload.
    pub fn put(&self, key: &str, body: impl Into<Vec<u8>>) {
        lock(&self.state).objects.insert(
            key.to_string(),
            StoredObject {
                content_type: None,
                body: body.into(),
            },
        );
    }

    /// Configures every following upload to fail.
    pub fn set_fail_uploads(&self, fail: bool) {
        lock(&self.state).fail_uploads = fail;
    }

    /// Number of successful uploads so far.
    pub fn upload_count(&self) -> usize {
        lock(&self.state).uploads
    }

    /// Returns all keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        lock(&self.state)
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the content type recorded for a key.
    pub fn content_type(&self, key: &str) -> Option<String> {
        lock(&self.state)
            .objects
            .get(key)
            .and_then(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(&self, key: &str, content_type: Option<&str>, body: Vec<u8>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_uploads {
            return Err(PortError::ObjectStore(format!("upload of {key} rejected")));
        }
        state.uploads += 1;
        state.objects.insert(
            key.to_string(),
            StoredObject {
                content_type: content_type.map(str::to_string),
                body,
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        Ok(lock(&self.state)
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        lock(&self.state)
            .objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| PortError::ObjectNotFound(key.to_string()))
    }
}

/// Object store backed by a local directory. Keys map to relative paths.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, key: &str, _content_type: Option<&str>, body: Vec<u8>) -> Result<()> {
        let path = resolve_key(&self.root, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = crate::template::collect_files(&self.root)
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = resolve_key(&self.root, key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
