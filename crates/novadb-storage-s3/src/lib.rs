//! S3-class remote `ObjectStore` backend.
//!
//! This adapter is the reason C4 (the write-through cache) exists: S3-class
//! stores are only eventually consistent from a reader's perspective right
//! after a write, so every write-after-read guarantee above this crate is
//! provided by `novadb_storage::WriteThroughCache`, not by this adapter.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use novadb_storage::{ListPage, ObjectStore, ObjectStoreError, Result};

pub struct S3Store {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Builds a client from the ambient environment (region, credentials
    /// chain), matching how most S3-fronted services bootstrap in practice.
    pub async fn from_env(bucket: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        Self::new(client, bucket, key_prefix)
    }

    fn full_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.key_prefix.trim_end_matches('/'), key)
        }
    }
}

fn classify_sdk_error<E: std::fmt::Display>(key: &str, e: E, is_not_found: bool, is_throttled: bool) -> ObjectStoreError {
    if is_not_found {
        ObjectStoreError::NotFound(key.to_string())
    } else if is_throttled {
        ObjectStoreError::Throttled(format!("{key}: {e}"))
    } else {
        ObjectStoreError::Transient(format!("{key}: {e}"))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let body = ByteStream::from(bytes);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(body)
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e, false, false))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| ObjectStoreError::Transient(format!("{key}: {e}")))?;
                Ok(Some(data.into_bytes()))
            }
            Err(e) => {
                let not_found = e.to_string().contains("NoSuchKey");
                let throttled = e.to_string().contains("SlowDown") || e.to_string().contains("Throttl");
                if not_found {
                    Ok(None)
                } else {
                    Err(classify_sdk_error(key, e, false, throttled))
                }
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("NotFound") => Ok(false),
            Err(e) => Err(classify_sdk_error(key, e, false, false)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e, false, false))?;
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage> {
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .max_keys(limit as i32);
        if let Some(token) = cursor {
            req = req.continuation_token(token);
        }
        let output = req
            .send()
            .await
            .map_err(|e| classify_sdk_error(prefix, e, false, false))?;

        let strip_len = if self.key_prefix.is_empty() {
            0
        } else {
            self.key_prefix.trim_end_matches('/').len() + 1
        };
        let keys = output
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .map(|k| k.get(strip_len..).unwrap_or(k).to_string())
            .collect();

        Ok(ListPage {
            keys,
            next_cursor: output.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn put_batch(&self, entries: Vec<(String, Bytes)>) -> Result<()> {
        // S3 has no native multi-object PUT; issue concurrently instead of
        // relying on the default sequential fallback.
        use futures::stream::{self, StreamExt};
        let results: Vec<Result<()>> = stream::iter(entries)
            .map(|(key, bytes)| async move { self.put(&key, bytes).await })
            .buffer_unordered(8)
            .collect()
            .await;
        for r in results {
            r?;
        }
        Ok(())
    }
}
