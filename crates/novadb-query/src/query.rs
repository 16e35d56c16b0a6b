//! The query object (spec.md §4.7): what to look up, not how.

use novadb_core::{EntityId, NounType, VerbType};
use novadb_index::Filter;
use serde::{Deserialize, Serialize};

/// `{from?, to?, type?, depth?}` graph constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectedSpec {
    pub from: Option<EntityId>,
    pub to: Option<EntityId>,
    pub verb_type: Option<VerbType>,
    pub depth: usize,
}

impl ConnectedSpec {
    pub fn new() -> Self {
        Self { depth: 1, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// Already-embedded query vector; resolving `like` text into this is
    /// the caller's (engine's) job via its embedding collaborator.
    pub similar: Option<Vec<f32>>,
    pub where_filter: Option<Filter>,
    pub connected: Option<ConnectedSpec>,
    pub noun_type: Option<NounType>,
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self { limit: 10, offset: 0, ..Default::default() }
    }

    pub fn with_similar(mut self, vector: Vec<f32>) -> Self {
        self.similar = Some(vector);
        self
    }

    pub fn with_where(mut self, filter: Filter) -> Self {
        self.where_filter = Some(filter);
        self
    }

    pub fn with_connected(mut self, spec: ConnectedSpec) -> Self {
        self.connected = Some(spec);
        self
    }

    pub fn with_type(mut self, noun_type: NounType) -> Self {
        self.noun_type = Some(noun_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}
