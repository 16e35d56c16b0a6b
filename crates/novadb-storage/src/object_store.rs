//! The C1 object store contract: a byte-addressed KV surface every backend
//! (memory, local filesystem, S3-class remote) implements identically.

use async_trait::async_trait;
use bytes::Bytes;
use novadb_core::NovaError;
use thiserror::Error;

/// Errors a backend classifies its own failures into. Converts into
/// [`NovaError`] at the boundary so callers above C1 only ever see the
/// shared taxonomy.
#[derive(Debug, Error, Clone)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("permanent storage error: {0}")]
    Permanent(String),

    #[error("throttled: {0}")]
    Throttled(String),
}

impl From<ObjectStoreError> for NovaError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(d) => NovaError::not_found(d),
            ObjectStoreError::Transient(d) => {
                NovaError::Transient(novadb_core::ErrorContext::new().with_detail(d))
            }
            ObjectStoreError::Permanent(d) => {
                NovaError::Permanent(novadb_core::ErrorContext::new().with_detail(d))
            }
            ObjectStoreError::Throttled(d) => {
                NovaError::Throttled(novadb_core::ErrorContext::new().with_detail(d))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// One page of a cursor-paginated `list`.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_cursor: Option<String>,
}

/// The C1 contract (spec.md §4.1). Every method is async; `put` must be
/// atomic from a reader's perspective and `list` yields lexicographically
/// stable, cursor-paginated order.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage>;

    /// Default batch implementation issues sequential `put`s; backends with
    /// a native batch API override this.
    async fn put_batch(&self, entries: Vec<(String, Bytes)>) -> Result<()> {
        for (key, bytes) in entries {
            self.put(&key, bytes).await?;
        }
        Ok(())
    }
}
