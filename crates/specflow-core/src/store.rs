//! Document stores for specs, hooks and steering files.
//!
//! A document is addressed by its name: the path relative to the store root,
//! without the extension, always with `/` separators (`checkout/design`).

use crate::error::{Result, SpecflowError};
use crate::paths;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of all known documents, sorted.
    async fn list(&self) -> Result<Vec<String>>;
    async fn load(&self, name: &str) -> Result<String>;
    async fn save(&self, name: &str, content: &str) -> Result<()>;
    /// Returns false when the document did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;
    /// Re-read the backing storage. Returns the number of documents.
    async fn refresh(&self) -> Result<usize>;
}

/// Something the reload coordinator can ask to re-read its sources.
#[async_trait]
pub trait Reloadable: Send + Sync {
    /// Returns the number of items now loaded.
    async fn reload(&self) -> Result<usize>;
}

fn validate_name(name: &str) -> Result<()> {
    if name.starts_with('.') || name.contains('\\') {
        return Err(SpecflowError::validation(format!(
            "document name '{name}': must be a relative name"
        )));
    }
    paths::resolve_within(Path::new(""), name).map(|_| ())
}

// ---------------------------------------------------------------------------
// FsDocumentStore
// ---------------------------------------------------------------------------

/// Documents stored as `<dir>/<name>.<extension>`, with an in-memory cache
/// rebuilt by [`DocumentStore::refresh`].
#[derive(Debug)]
pub struct FsDocumentStore {
    dir: PathBuf,
    extension: String,
    cache: RwLock<BTreeMap<String, String>>,
}

impl FsDocumentStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        paths::resolve_within(&self.dir, &format!("{name}.{}", self.extension))
    }

    fn name_for(&self, path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != self.extension {
            return None;
        }
        let rel = path.strip_prefix(&self.dir).ok()?.with_extension("");
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        if name.is_empty() || name.split('/').any(|seg| seg.starts_with('.')) {
            return None;
        }
        Some(name)
    }

    async fn scan(&self) -> Result<BTreeMap<String, String>> {
        let mut docs = BTreeMap::new();
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(docs);
        }
        let mut pending = vec![self.dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(name) = self.name_for(&path) {
                    match tokio::fs::read_to_string(&path).await {
                        Ok(content) => {
                            docs.insert(name, content);
                        }
                        // Deleted between read_dir and read.
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self) -> Result<Vec<String>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.keys().cloned().collect())
    }

    async fn load(&self, name: &str) -> Result<String> {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(content) = cached {
            return Ok(content);
        }
        let path = self.path_for(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string(), content.clone());
                Ok(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SpecflowError::document_not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path_for(name)?;
        let data = content.to_owned();
        tokio::task::spawn_blocking(move || crate::io::atomic_write(&path, data.as_bytes()))
            .await
            .map_err(|e| SpecflowError::Execution(format!("write task failed: {e}")))??;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), content.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        let removed = crate::io::remove_if_exists(&path)?;
        let cached = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        Ok(removed || cached)
    }

    async fn refresh(&self) -> Result<usize> {
        let docs = self.scan().await?;
        let count = docs.len();
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = docs;
        tracing::debug!(dir = %self.dir.display(), count, "document store refreshed");
        Ok(count)
    }
}

#[async_trait]
impl Reloadable for FsDocumentStore {
    async fn reload(&self) -> Result<usize> {
        self.refresh().await
    }
}

// ---------------------------------------------------------------------------
// MemoryDocumentStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<String, String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self) -> Result<Vec<String>> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.keys().cloned().collect())
    }

    async fn load(&self, name: &str) -> Result<String> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SpecflowError::document_not_found(name))
    }

    async fn save(&self, name: &str, content: &str) -> Result<()> {
        validate_name(name)?;
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), content.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self
            .docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some())
    }

    async fn refresh(&self) -> Result<usize> {
        Ok(self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }
}

#[async_trait]
impl Reloadable for MemoryDocumentStore {
    async fn reload(&self) -> Result<usize> {
        self.refresh().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
