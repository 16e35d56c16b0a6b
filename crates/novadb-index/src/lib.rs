//! Entity store, metadata index, graph adjacency index and HNSW index.
//!
//! These are the four per-branch indexes C6-C9 described in spec.md §4.4-§4.8;
//! `novadb-query` fuses them and `novadb-engine` owns their lifecycle.

pub mod entity_store;
pub mod graph_index;
pub mod hnsw;
pub mod metadata_index;

pub use entity_store::EntityStore;
pub use graph_index::GraphIndex;
pub use hnsw::{Hnsw, HnswParams, MultiHnsw};
pub use metadata_index::{Filter, MetadataIndex};
