// src/storage/store.rs
//! Narrow object-store interface plus two backends.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::StoreError;

/// An object as handed to `ObjectStore::put`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PutObject {
    pub body: Vec<u8>,
    pub content_type: String,
    /// User metadata / tags carried alongside the object.
    pub tags: BTreeMap<String, String>,
    /// Requested server-side encryption, e.g. `AES256`.
    pub server_side_encryption: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create-only: fails with `StoreError::AlreadyExists` if the key is taken.
    async fn put(&self, bucket: &str, key: &str, object: PutObject) -> Result<(), StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<PutObject>, StoreError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// URL scheme used when reporting object locations.
    fn scheme(&self) -> &'static str;
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Name prefix of bodies still being written by `FsStore::put`.
const PARTIAL_PREFIX: &str = ".partial-";

/// In-process store. Useful for tests and for embedding the pipeline.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), PutObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), PutObject>>, StoreError> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".into()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, bucket: &str, key: &str, object: PutObject) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut objects = self.lock()?;
        let slot = (bucket.to_string(), key.to_string());
        if objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        objects.insert(slot, object);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<PutObject>, StoreError> {
        let objects = self.lock()?;
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.lock()?;
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn scheme(&self) -> &'static str {
        "memory"
    }
}

/// Local filesystem store: `{root}/{bucket}/{key}`. Only the body is
/// persisted; content type, tags and encryption are logged and dropped.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        let b = Path::new(bucket);
        if bucket.is_empty() || b.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(StoreError::InvalidKey(format!("bucket {bucket:?}")));
        }
        let mut path = self.root.join(bucket);
        for seg in key.split('/') {
            path.push(seg);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, bucket: &str, key: &str, object: PutObject) -> Result<(), StoreError> {
        let path = self.path_for(bucket, key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        tokio::fs::create_dir_all(&parent).await?;

        // readers only ever see a complete body at the final path
        let body = object.body;
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(PARTIAL_PREFIX)
                .tempfile_in(&parent)?;
            tmp.write_all(&body)?;
            tmp.as_file().sync_all()?;
            tmp.persist_noclobber(&target).map(|_| ()).map_err(|e| e.error)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("put task failed: {e}")))?;

        written.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::AlreadyExists {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(e)
            }
        })?;

        tracing::debug!(
            path = %path.display(),
            content_type = %object.content_type,
            tags = object.tags.len(),
            "object written to filesystem"
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<PutObject>, StoreError> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(PutObject {
                body,
                ..PutObject::default()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let base = self.root.join(bucket);
        let prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || walk_keys(&base))
            .await
            .map_err(|e| StoreError::Backend(format!("list task failed: {e}")))??;
        Ok(keys.into_iter().filter(|k| k.starts_with(&prefix)).collect())
    }

    fn scheme(&self) -> &'static str {
        "file"
    }
}

/// Regular files under `base` as `/`-joined keys. Symlinks are not followed
/// and in-flight temp files are skipped.
fn walk_keys(base: &Path) -> Result<Vec<String>, StoreError> {
    let mut out = Vec::new();
    if !base.exists() {
        return Ok(out);
    }
    for entry in WalkDir::new(base) {
        let entry = entry.map_err(|e| StoreError::Backend(format!("walk {}: {e}", base.display())))?;
        if !entry.file_type().is_file()
            || entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX)
        {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(base) {
            let key: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(key.join("/"));
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(body: &str) -> PutObject {
        PutObject {
            body: body.as_bytes().to_vec(),
            content_type: "text/plain".into(),
            ..PutObject::default()
        }
    }

    #[tokio::test]
    async fn memory_create_refuses_existing_key() {
        let s = MemoryStore::new();
        s.put("b", "a/x.json", obj("1")).await.unwrap();
        let err = s.put("b", "a/x.json", obj("2")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(s.get("b", "a/x.json").await.unwrap().unwrap().body, b"1");
    }

    #[tokio::test]
    async fn memory_list_is_scoped_by_bucket_and_prefix() {
        let s = MemoryStore::new();
        s.put("b", "raw/1", obj("")).await.unwrap();
        s.put("b", "raw/2", obj("")).await.unwrap();
        s.put("b", "other/3", obj("")).await.unwrap();
        s.put("c", "raw/4", obj("")).await.unwrap();
        assert_eq!(s.list("b", "raw/").await.unwrap(), vec!["raw/1", "raw/2"]);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let s = MemoryStore::new();
        for key in ["../etc/passwd", "/abs", "a//b", "a/./b", ""] {
            assert!(matches!(
                s.put("b", key, obj("")).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }
}
