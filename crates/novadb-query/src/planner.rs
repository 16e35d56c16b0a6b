//! Query planner + fuser (C10, spec.md §4.7): intersects C7/C8 candidate
//! sets, ranks via C9 (or a deterministic id tiebreak), and materializes
//! the final page from C6.

use crate::query::{ConnectedSpec, Query};
use novadb_core::{EntityId, Noun, NounType, Result};
use novadb_index::{EntityStore, GraphIndex, MetadataIndex, MultiHnsw};
use novadb_storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntity {
    pub id: EntityId,
    pub score: f32,
    pub entity: Noun,
}

pub struct QueryPlanner<S: ObjectStore> {
    entity_store: Arc<EntityStore<S>>,
    metadata_index: Arc<MetadataIndex>,
    graph_index: Arc<GraphIndex>,
    hnsw: Arc<MultiHnsw>,
}

impl<S: ObjectStore + 'static> QueryPlanner<S> {
    pub fn new(
        entity_store: Arc<EntityStore<S>>,
        metadata_index: Arc<MetadataIndex>,
        graph_index: Arc<GraphIndex>,
        hnsw: Arc<MultiHnsw>,
    ) -> Self {
        Self { entity_store, metadata_index, graph_index, hnsw }
    }

    pub async fn find(&self, query: &Query) -> Result<Vec<ScoredEntity>> {
        let connected_candidates = query.connected.as_ref().map(|c| self.expand_connected(c));
        let where_candidates = query.where_filter.as_ref().map(|f| self.metadata_index.query(f));
        let base_candidates = intersect_optional(connected_candidates, where_candidates);

        let types: Vec<NounType> = match query.noun_type {
            Some(t) => vec![t],
            None => NounType::ALL.to_vec(),
        };

        let mut scored: Vec<(EntityId, NounType, f32)> = Vec::new();
        for t in types {
            let type_ids: HashSet<EntityId> = self.entity_store.list_nouns_by_type(t).await?.into_iter().collect();
            let candidates: HashSet<EntityId> = match &base_candidates {
                Some(set) => type_ids.intersection(set).copied().collect(),
                None => type_ids,
            };
            if candidates.is_empty() {
                continue;
            }

            if let Some(query_vector) = &query.similar {
                let hnsw = self.hnsw.for_type(t);
                for (id, distance) in hnsw.search_among(query_vector, &candidates, query.limit + query.offset) {
                    scored.push((id, t, 1.0 - distance));
                }
            } else {
                let mut ids: Vec<EntityId> = candidates.into_iter().collect();
                ids.sort();
                for id in ids {
                    scored.push((id, t, 1.0));
                }
            }
        }

        if query.similar.is_some() {
            scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));
        } else {
            scored.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let page = scored.into_iter().skip(query.offset).take(query.limit);

        let mut out = Vec::new();
        for (id, noun_type, score) in page {
            if let Some(noun) = self.entity_store.get_noun(noun_type, id).await? {
                out.push(ScoredEntity { id, score, entity: noun });
            }
        }
        Ok(out)
    }

    /// BFS bounded by `spec.depth` (default 1) over both forward and
    /// backward edges, using the combined-key posting when `verbType` is
    /// given — per spec.md §4.6, that posting is authoritative.
    fn expand_connected(&self, spec: &ConnectedSpec) -> HashSet<EntityId> {
        let mut frontier = HashSet::new();
        if let Some(from) = spec.from {
            frontier.insert(from);
        }
        if let Some(to) = spec.to {
            frontier.insert(to);
        }
        if frontier.is_empty() {
            return frontier;
        }

        let mut visited = frontier.clone();
        let mut current = frontier;
        let depth = spec.depth.max(1);
        for _ in 0..depth {
            let mut next = HashSet::new();
            for &node in &current {
                let outgoing = match spec.verb_type {
                    Some(vt) => self.graph_index.verbs_from_with_type(node, vt),
                    None => self.graph_index.verbs_from(node),
                };
                for verb_id in outgoing {
                    if let Some((_, target, _)) = self.graph_index.endpoints(verb_id) {
                        if visited.insert(target) {
                            next.insert(target);
                        }
                    }
                }
                for verb_id in self.graph_index.verbs_to(node) {
                    if let Some((source, _, vt)) = self.graph_index.endpoints(verb_id) {
                        if spec.verb_type.map_or(true, |want| want == vt) && visited.insert(source) {
                            next.insert(source);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            current = next;
        }
        visited
    }
}

fn intersect_optional(a: Option<HashSet<EntityId>>, b: Option<HashSet<EntityId>>) -> Option<HashSet<EntityId>> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x),
        (Some(x), Some(y)) => Some(x.intersection(&y).copied().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novadb_core::{Value, VerbType};
    use novadb_index::{Hnsw, HnswParams};
    use novadb_storage::WriteThroughCache;
    use novadb_storage_memory::MemoryStore;
    use std::collections::BTreeMap;

    fn noun(noun_type: NounType, vector: Vec<f32>, name: &str) -> Noun {
        let mut m = BTreeMap::new();
        m.insert("name".to_string(), Value::Str(name.to_string()));
        Noun {
            id: EntityId::new(),
            noun_type,
            vector,
            metadata: Value::Obj(m),
            created_at: 0,
            updated_at: 0,
            service: None,
        }
    }

    async fn setup() -> (
        Arc<EntityStore<MemoryStore>>,
        Arc<MetadataIndex>,
        Arc<GraphIndex>,
        Arc<MultiHnsw>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(WriteThroughCache::new(store.clone()));
        let entity_store = Arc::new(EntityStore::new(cache, store, "main"));
        let metadata_index = Arc::new(MetadataIndex::new());
        let graph_index = Arc::new(GraphIndex::new());
        let hnsw = Arc::new(MultiHnsw::new(HnswParams::default()));
        (entity_store, metadata_index, graph_index, hnsw)
    }

    #[tokio::test]
    async fn pure_filter_query_scores_one() {
        let (entity_store, metadata_index, graph_index, hnsw) = setup().await;
        let n = noun(NounType::Person, vec![1.0, 0.0], "alice");
        entity_store.save_noun(&n).await.unwrap();
        metadata_index.add(n.id, &n.metadata);

        let planner = QueryPlanner::new(entity_store, metadata_index.clone(), graph_index, hnsw);
        let query = Query::new().with_where(novadb_index::Filter::Eq {
            field: "name".into(),
            value: Value::Str("alice".into()),
        });
        let results = planner.find(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn similar_query_ranks_by_distance() {
        let (entity_store, metadata_index, graph_index, hnsw) = setup().await;
        let close = noun(NounType::Person, vec![1.0, 0.0], "close");
        let far = noun(NounType::Person, vec![0.0, 1.0], "far");
        entity_store.save_noun(&close).await.unwrap();
        entity_store.save_noun(&far).await.unwrap();

        let type_hnsw: Arc<Hnsw> = hnsw.for_type(NounType::Person);
        type_hnsw.insert(close.id, &close.vector).await;
        type_hnsw.insert(far.id, &far.vector).await;

        let planner = QueryPlanner::new(entity_store, metadata_index, graph_index, hnsw);
        let query = Query::new().with_similar(vec![0.9, 0.1]).with_type(NounType::Person).with_limit(2);
        let results = planner.find(&query).await.unwrap();
        assert_eq!(results[0].id, close.id);
    }

    #[tokio::test]
    async fn connected_query_expands_via_graph_index() {
        let (entity_store, metadata_index, graph_index, hnsw) = setup().await;
        let a = noun(NounType::Person, vec![], "a");
        let b = noun(NounType::Person, vec![], "b");
        entity_store.save_noun(&a).await.unwrap();
        entity_store.save_noun(&b).await.unwrap();
        graph_index.add_verb(EntityId::new(), a.id, b.id, VerbType::Follows);

        let planner = QueryPlanner::new(entity_store, metadata_index, graph_index, hnsw);
        let query = Query::new().with_connected(ConnectedSpec { from: Some(a.id), to: None, verb_type: None, depth: 1 });
        let results = planner.find(&query).await.unwrap();
        let ids: HashSet<EntityId> = results.iter().map(|r| r.id).collect();
        assert!(ids.contains(&a.id));
        assert!(ids.contains(&b.id));
    }
}
