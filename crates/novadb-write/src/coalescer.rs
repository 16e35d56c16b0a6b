//! Batches heterogeneous put/delete operations into the object store's
//! batch interfaces (spec.md §4.3 "Coalescer").

use bytes::Bytes;
use novadb_storage::{ObjectStore, Result};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Op {
    Put { key: String, bytes: Bytes },
    Delete { key: String },
}

/// Groups a batch of heterogeneous ops into one `put_batch` call plus
/// individual deletes (the C1 contract has no native batch-delete).
pub struct Coalescer<S: ObjectStore> {
    store: Arc<S>,
}

impl<S: ObjectStore> Coalescer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn apply(&self, ops: Vec<Op>) -> Result<()> {
        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for op in ops {
            match op {
                Op::Put { key, bytes } => puts.push((key, bytes)),
                Op::Delete { key } => deletes.push(key),
            }
        }
        if !puts.is_empty() {
            self.store.put_batch(puts).await?;
        }
        for key in deletes {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}
