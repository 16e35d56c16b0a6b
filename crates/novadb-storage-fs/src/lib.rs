//! Local filesystem `ObjectStore` backend.
//!
//! Atomicity is implemented via write-to-temp-then-rename within the same
//! directory as the target key (spec.md §4.1): a reader never observes a
//! partial write, and on any write error the temp file is cleaned up.

use async_trait::async_trait;
use bytes::Bytes;
use novadb_storage::{ListPage, ObjectStore, ObjectStoreError, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    }

    fn classify_io_err(key: &str, e: std::io::Error) -> ObjectStoreError {
        use std::io::ErrorKind::*;
        match e.kind() {
            NotFound => ObjectStoreError::NotFound(key.to_string()),
            PermissionDenied => ObjectStoreError::Permanent(format!("{key}: {e}")),
            _ => ObjectStoreError::Transient(format!("{key}: {e}")),
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let target = self.path_for(key);
        let dir = target.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Self::classify_io_err(key, e))?;

        let tmp_name = format!(".tmp-{}", uuid_like_suffix());
        let tmp_path = dir.join(tmp_name);

        let write_result = async {
            let mut f = tokio::fs::File::create(&tmp_path).await?;
            f.write_all(&bytes).await?;
            f.flush().await?;
            tokio::fs::rename(&tmp_path, &target).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Self::classify_io_err(key, e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::classify_io_err(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.path_for(key)).await.is_ok())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tokio::fs::remove_file(self.path_for(key))
            .await
            .map_err(|e| Self::classify_io_err(key, e))
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage> {
        let mut keys = Vec::new();
        let start_dir = self.root.clone();
        if start_dir.exists() {
            collect_keys(&start_dir, &mut keys).await?;
        }
        let mut keys: Vec<String> = keys
            .into_iter()
            .filter_map(|p| self.key_for(&p))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();

        let start = match cursor {
            Some(c) => keys.partition_point(|k| k.as_str() <= c),
            None => 0,
        };
        let page: Vec<String> = keys[start..].iter().take(limit).cloned().collect();
        let next_cursor = if start + page.len() < keys.len() {
            page.last().cloned()
        } else {
            None
        };
        Ok(ListPage {
            keys: page,
            next_cursor,
        })
    }
}

fn collect_keys<'a>(
    dir: &'a Path,
    out: &'a mut Vec<PathBuf>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))?
        {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(".tmp-") {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;
            if file_type.is_dir() {
                collect_keys(&path, out).await?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    })
}

fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}
