//! Bounded-concurrency bulk reader, mirroring the teacher's `BatchReader`.

use crate::object_store::{ObjectStore, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

pub struct BatchReader<S: ObjectStore> {
    backend: Arc<S>,
    concurrency: usize,
}

impl<S: ObjectStore> BatchReader<S> {
    pub fn new(backend: Arc<S>, concurrency: usize) -> Self {
        Self { backend, concurrency: concurrency.max(1) }
    }

    /// Reads every key, preserving input order; a missing key resolves to
    /// `None` at its position rather than failing the whole batch.
    pub async fn read_many(&self, keys: Vec<String>) -> Result<Vec<Option<Bytes>>> {
        stream::iter(keys)
            .map(|key| {
                let backend = self.backend.clone();
                async move { backend.get(&key).await }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ListPage;
    use async_trait::async_trait;
    use dashmap::DashMap;

    #[derive(Default)]
    struct FakeStore {
        data: DashMap<String, Bytes>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
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
        async fn list(&self, _prefix: &str, _cursor: Option<&str>, _limit: usize) -> Result<ListPage> {
            Ok(ListPage::default())
        }
    }

    #[tokio::test]
    async fn read_many_preserves_order() {
        let store = Arc::new(FakeStore::default());
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        store.put("c", Bytes::from_static(b"3")).await.unwrap();
        let reader = BatchReader::new(store, 4);
        let got = reader
            .read_many(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(got[0], Some(Bytes::from_static(b"1")));
        assert_eq!(got[1], None);
        assert_eq!(got[2], Some(Bytes::from_static(b"3")));
    }
}
