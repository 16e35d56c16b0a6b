//! Object store abstraction (C1), write-through cache + per-key mutex (C4),
//! and bounded-concurrency batch reading.

pub mod batch;
pub mod cache;
pub mod object_store;

pub use batch::BatchReader;
pub use cache::WriteThroughCache;
pub use object_store::{ListPage, ObjectStore, ObjectStoreError, Result};
