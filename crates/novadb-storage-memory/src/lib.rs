//! In-memory `ObjectStore` backend. No persistence across process restarts;
//! intended for tests and ephemeral engines.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use novadb_storage::{ListPage, ObjectStore, ObjectStoreError, Result};

#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.data.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.data.remove(key).is_none() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .map(|e| e.key().clone())
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

    async fn put_batch(&self, entries: Vec<(String, Bytes)>) -> Result<()> {
        for (key, bytes) in entries {
            self.data.insert(key, bytes);
        }
        Ok(())
    }
}
