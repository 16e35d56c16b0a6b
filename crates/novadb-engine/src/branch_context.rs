//! Per-branch bundle of live indexes (C6-C10), and the `TreeSource`
//! implementation `novadb-vcs`'s commit manager needs to hash a branch's
//! current state into a commit.

use async_trait::async_trait;
use novadb_core::{EntityId, NounType, Result, VerbType, Value};
use novadb_index::{EntityStore, GraphIndex, MetadataIndex, MultiHnsw};
use novadb_query::QueryPlanner;
use novadb_storage::{ObjectStore, WriteThroughCache};
use novadb_vcs::TreeSource;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a branch needs to serve reads and writes: the entity store
/// (C6) plus the three secondary indexes (C7 metadata, C8 graph, C9 HNSW)
/// and the planner (C10) that fuses them.
pub struct BranchContext<S: ObjectStore> {
    pub entity_store: Arc<EntityStore<S>>,
    pub metadata_index: Arc<MetadataIndex>,
    pub graph_index: Arc<GraphIndex>,
    pub hnsw: Arc<MultiHnsw>,
    pub planner: QueryPlanner<S>,
}

impl<S: ObjectStore + 'static> BranchContext<S> {
    /// Builds a context for the root branch with empty secondary indexes;
    /// call `rehydrate` afterwards to replay persisted nouns/verbs back into
    /// them after a process restart.
    pub fn root(cache: Arc<WriteThroughCache<S>>, store: Arc<S>, branch: impl Into<String>, hnsw_params: novadb_index::HnswParams) -> Self {
        let entity_store = Arc::new(EntityStore::new(cache, store, branch));
        let metadata_index = Arc::new(MetadataIndex::new());
        let graph_index = Arc::new(GraphIndex::new());
        let hnsw = Arc::new(MultiHnsw::new(hnsw_params));
        let planner =
            QueryPlanner::new(entity_store.clone(), metadata_index.clone(), graph_index.clone(), hnsw.clone());
        Self { entity_store, metadata_index, graph_index, hnsw, planner }
    }

    /// Forks a child branch's context from `self` (spec.md §4.9 fork steps
    /// 3-4): the entity store gets COW inheritance via `with_parent`, the
    /// HNSW index forks in O(1), and the metadata/graph postings are
    /// snapshot-cloned (see their `fork` docs for why they don't share the
    /// HNSW's COW-node scheme).
    pub fn fork(
        &self,
        cache: Arc<WriteThroughCache<S>>,
        store: Arc<S>,
        child_branch: impl Into<String>,
        parent_branch: impl Into<String>,
    ) -> Self {
        let entity_store = Arc::new(EntityStore::new(cache, store, child_branch).with_parent(parent_branch));
        let metadata_index = Arc::new(self.metadata_index.fork());
        let graph_index = Arc::new(self.graph_index.fork());
        let hnsw = Arc::new(self.hnsw.fork());
        let planner =
            QueryPlanner::new(entity_store.clone(), metadata_index.clone(), graph_index.clone(), hnsw.clone());
        Self { entity_store, metadata_index, graph_index, hnsw, planner }
    }

    /// Replays every persisted noun/verb into the in-memory secondary
    /// indexes. `Engine` calls this once per branch the first time it's
    /// touched in a process, so a restart doesn't lose query/similarity
    /// results for data written in a prior process.
    pub async fn rehydrate(&self) -> Result<()> {
        for &noun_type in NounType::ALL {
            for id in self.entity_store.list_nouns_by_type(noun_type).await? {
                if let Some(noun) = self.entity_store.get_noun(noun_type, id).await? {
                    self.metadata_index.add(id, &noun.metadata);
                    if !noun.vector.is_empty() {
                        self.hnsw.for_type(noun_type).insert(id, &noun.vector).await;
                    }
                }
            }
        }
        for &verb_type in VerbType::ALL {
            for id in self.entity_store.list_verbs_by_type(verb_type).await? {
                if let Some(verb) = self.entity_store.get_verb(verb_type, id).await? {
                    self.graph_index.add_verb(id, verb.source_id, verb.target_id, verb_type);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ObjectStore + 'static> TreeSource for BranchContext<S> {
    /// Hashes every noun's content over every type, in sorted (type, id)
    /// order so the resulting tree is stable regardless of insertion order
    /// (spec.md invariant 6, content-hash stability).
    async fn tree_snapshot(&self, _branch: &str) -> Result<Value> {
        let mut nouns = BTreeMap::new();
        for &noun_type in NounType::ALL {
            let mut ids = self.entity_store.list_nouns_by_type(noun_type).await?;
            ids.sort();
            for id in ids {
                if let Some(noun) = self.entity_store.get_noun(noun_type, id).await? {
                    nouns.insert(id.to_string(), Value::Str(hash_of(&noun)));
                }
            }
        }

        let mut verbs = BTreeMap::new();
        let mut verb_ids: Vec<EntityId> = self.graph_index.all_verb_ids();
        verb_ids.sort();
        for verb_id in verb_ids {
            let Some((_, _, verb_type)) = self.graph_index.endpoints(verb_id) else { continue };
            if let Some(verb) = self.entity_store.get_verb(verb_type, verb_id).await? {
                verbs.insert(verb_id.to_string(), Value::Str(hash_of(&verb)));
            }
        }

        let mut tree = BTreeMap::new();
        tree.insert("nouns".to_string(), Value::Obj(nouns));
        tree.insert("verbs".to_string(), Value::Obj(verbs));
        Ok(Value::Obj(tree))
    }
}

fn hash_of<T: serde::Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).expect("entity serializes for hashing");
    novadb_core::ObjectId::from_canonical_bytes(&bytes).to_string()
}
