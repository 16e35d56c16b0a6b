//! Write-through cache + per-key mutex (C4, spec.md §4.2).
//!
//! Converts the eventual consistency of a remote C1 adapter into strict
//! read-your-writes for a single process, and serializes concurrent writers
//! of the same key so HNSW neighbor rewrites never lose an update.

use crate::object_store::{ObjectStore, Result};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type WitnessKey = (String, String);

/// Process-local layer sitting between C5/C6 and C1.
pub struct WriteThroughCache<S: ObjectStore> {
    inner: Arc<S>,
    witness: Arc<DashMap<WitnessKey, Bytes>>,
    key_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    witness_grace: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: ObjectStore + 'static> WriteThroughCache<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self::with_grace(inner, Duration::from_millis(50))
    }

    pub fn with_grace(inner: Arc<S>, witness_grace: Duration) -> Self {
        Self {
            inner,
            witness: Arc::new(DashMap::new()),
            key_locks: Arc::new(DashMap::new()),
            witness_grace,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Share of `read` calls satisfied by the witness map, the process-local
    /// read-your-writes layer, without falling through to the backing store.
    /// `0.0` before the first read rather than `NaN`.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Serializes writers targeting `key`; on success keeps `value` as a
    /// read-after-write witness for `(branch, key)` until the grace period
    /// elapses, then drops it unless a newer write has replaced it.
    pub async fn write(&self, branch: &str, key: &str, value: Bytes) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let witness_key = (branch.to_string(), key.to_string());
        self.witness.insert(witness_key.clone(), value.clone());

        match self.inner.put(key, value.clone()).await {
            Ok(()) => {
                let witness = self.witness.clone();
                let grace = self.witness_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    // Only remove if nobody wrote a newer value in the meantime.
                    if let Some(entry) = witness.get(&witness_key) {
                        if *entry == value {
                            drop(entry);
                            witness.remove(&witness_key);
                        }
                    }
                });
                Ok(())
            }
            Err(e) => {
                self.witness.remove(&witness_key);
                Err(e)
            }
        }
    }

    /// Reads `key` for `branch`: witness, then C1 directly, then (if COW
    /// inheritance is active) the parent branch's path.
    pub async fn read(
        &self,
        branch: &str,
        key: &str,
        parent: Option<(&str, &str)>,
    ) -> Result<Option<Bytes>> {
        if let Some(v) = self.witness.get(&(branch.to_string(), key.to_string())) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(v.clone()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(v) = self.inner.get(key).await? {
            return Ok(Some(v));
        }
        if let Some((parent_branch, parent_key)) = parent {
            return Box::pin(self.read(parent_branch, parent_key, None)).await;
        }
        Ok(None)
    }

    pub async fn exists(&self, branch: &str, key: &str, parent: Option<(&str, &str)>) -> Result<bool> {
        Ok(self.read(branch, key, parent).await?.is_some())
    }

    pub async fn delete(&self, branch: &str, key: &str) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.witness.remove(&(branch.to_string(), key.to_string()));
        self.inner.delete(key).await
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Reads, transforms and writes `key` under a single held mutex guard,
    /// so the read and the write can never interleave with another writer
    /// of the same key. This is the mechanism `saveHNSW*` operations rely
    /// on to avoid lost updates during neighbor rewrites.
    pub async fn read_modify_write<F, Fut>(
        &self,
        branch: &str,
        key: &str,
        parent: Option<(&str, &str)>,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(Option<Bytes>) -> Fut,
        Fut: std::future::Future<Output = Result<Bytes>>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let witness_key = (branch.to_string(), key.to_string());
        let current = if let Some(v) = self.witness.get(&witness_key) {
            Some(v.clone())
        } else if let Some(v) = self.inner.get(key).await? {
            Some(v)
        } else if let Some((_, parent_key)) = parent {
            self.inner.get(parent_key).await?
        } else {
            None
        };

        let new_value = f(current).await?;
        self.witness.insert(witness_key.clone(), new_value.clone());

        match self.inner.put(key, new_value.clone()).await {
            Ok(()) => {
                let witness = self.witness.clone();
                let grace = self.witness_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(entry) = witness.get(&witness_key) {
                        if *entry == new_value {
                            drop(entry);
                            witness.remove(&witness_key);
                        }
                    }
                });
                Ok(())
            }
            Err(e) => {
                self.witness.remove(&witness_key);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_for_tests::InMemoryStore;

    #[tokio::test]
    async fn read_after_write_is_strict() {
        let store = Arc::new(InMemoryStore::new());
        let cache = WriteThroughCache::new(store);
        cache.write("main", "k", Bytes::from_static(b"v1")).await.unwrap();
        let got = cache.read("main", "k", None).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"v1")));
    }

    #[tokio::test]
    async fn cow_inheritance_falls_through_to_parent() {
        let store = Arc::new(InMemoryStore::new());
        let cache = WriteThroughCache::new(store);
        cache.write("main", "p/k", Bytes::from_static(b"parent-value")).await.unwrap();
        let got = cache.read("child", "c/k", Some(("main", "p/k"))).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"parent-value")));
    }

    #[tokio::test]
    async fn read_modify_write_preserves_untouched_fields() {
        let store = Arc::new(InMemoryStore::new());
        let cache = WriteThroughCache::new(store);
        cache.write("main", "node", Bytes::from_static(b"{\"level\":0,\"tag\":\"a\"}")).await.unwrap();
        cache
            .read_modify_write("main", "node", None, |current| async move {
                let mut s = current.map(|b| String::from_utf8(b.to_vec()).unwrap()).unwrap_or_default();
                s = s.replace("\"tag\":\"a\"", "\"tag\":\"b\"");
                Ok(Bytes::from(s))
            })
            .await
            .unwrap();
        let got = cache.read("main", "node", None).await.unwrap().unwrap();
        assert_eq!(&*got, b"{\"level\":0,\"tag\":\"b\"}".as_slice());
    }

    #[tokio::test]
    async fn hit_rate_tracks_witness_hits_against_misses() {
        let store = Arc::new(InMemoryStore::new());
        let cache = WriteThroughCache::new(store);
        assert_eq!(cache.hit_rate(), 0.0);

        cache.write("main", "k", Bytes::from_static(b"v1")).await.unwrap();
        cache.read("main", "k", None).await.unwrap();
        cache.read("main", "k", None).await.unwrap();
        cache.read("main", "missing", None).await.unwrap();
        assert_eq!(cache.hit_rate(), 2.0 / 3.0);
    }

    #[tokio::test]
    async fn concurrent_writers_to_same_key_serialize() {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(WriteThroughCache::new(store));
        let mut handles = Vec::new();
        for i in 0..20u8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .write("main", "hot-key", Bytes::from(vec![i]))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let got = cache.read("main", "hot-key", None).await.unwrap();
        assert!(got.is_some());
    }
}

#[cfg(test)]
mod memory_for_tests {
    //! Minimal in-process `ObjectStore` used only by this module's tests;
    //! the real in-memory backend lives in `novadb-storage-memory`.
    use crate::object_store::{ListPage, ObjectStore, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use dashmap::DashMap;

    #[derive(Default)]
    pub struct InMemoryStore {
        data: DashMap<String, Bytes>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ObjectStore for InMemoryStore {
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
            self.data.remove(key);
            Ok(())
        }

        async fn list(&self, prefix: &str, _cursor: Option<&str>, limit: usize) -> Result<ListPage> {
            let mut keys: Vec<String> = self
                .data
                .iter()
                .map(|e| e.key().clone())
                .filter(|k| k.starts_with(prefix))
                .collect();
            keys.sort();
            keys.truncate(limit);
            Ok(ListPage {
                keys,
                next_cursor: None,
            })
        }
    }
}
