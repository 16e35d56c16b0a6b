//! Public engine facade (C-top, spec.md §6): configuration, the embedding
//! and augmentation-hook collaborators, retry/timeout policy, the
//! per-branch context bundle, and the `Engine` that ties them to the VCS
//! managers (C11) and per-branch indexes (C6-C10).

pub mod branch_context;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod hooks;
pub mod retry;

pub use branch_context::BranchContext;
pub use config::{CacheConfig, EngineConfig, EvictionPolicy, HnswConfig, StorageConfig, StorageKind, TimeoutsConfig, WriteConfig};
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider};
pub use engine::{
    AddRequest, EmbedInput, Engine, OperatingMode, RelateRequest, RelationsQuery, Statistics, StorageFootprint,
    UpdateRequest,
};
pub use hooks::{AugmentationHook, HookChain, NextFn, ProvideStorageHook};
pub use retry::{with_retry, with_timeout, RetryPolicy};
