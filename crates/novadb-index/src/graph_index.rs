//! Graph adjacency index (C8, spec.md §4.6): three posting lists over verb
//! ids, keyed by source, by target, and by the combined `(source, verbType)`
//! pair. Filters naming both `sourceId` and `verbType` must resolve through
//! the combined-key posting rather than intersecting the two single-key
//! postings, since the single-key postings can be momentarily out of step
//! with each other during concurrent writes while the combined posting is
//! always updated atomically with the verb it describes.

use dashmap::DashSet;
use dashmap::DashMap;
use novadb_core::{EntityId, VerbType};
use std::collections::HashSet;

#[derive(Default)]
pub struct GraphIndex {
    by_source: DashMap<EntityId, DashSet<EntityId>>,
    by_target: DashMap<EntityId, DashSet<EntityId>>,
    by_source_verb_type: DashMap<(EntityId, VerbType), DashSet<EntityId>>,
    /// verb id -> (source, target, type); an adjunct to the three postings
    /// above, used only to resolve a verb's other endpoint during `connected`
    /// traversal. Not itself a query entry point.
    endpoints: DashMap<EntityId, (EntityId, EntityId, VerbType)>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_verb(&self, verb_id: EntityId, source_id: EntityId, target_id: EntityId, verb_type: VerbType) {
        self.by_source.entry(source_id).or_default().insert(verb_id);
        self.by_target.entry(target_id).or_default().insert(verb_id);
        self.by_source_verb_type
            .entry((source_id, verb_type))
            .or_default()
            .insert(verb_id);
        self.endpoints.insert(verb_id, (source_id, target_id, verb_type));
    }

    pub fn remove_verb(&self, verb_id: EntityId, source_id: EntityId, target_id: EntityId, verb_type: VerbType) {
        if let Some(set) = self.by_source.get(&source_id) {
            set.remove(&verb_id);
        }
        if let Some(set) = self.by_target.get(&target_id) {
            set.remove(&verb_id);
        }
        if let Some(set) = self.by_source_verb_type.get(&(source_id, verb_type)) {
            set.remove(&verb_id);
        }
        self.endpoints.remove(&verb_id);
    }

    pub fn rebuild(&self, verbs: impl Iterator<Item = (EntityId, EntityId, EntityId, VerbType)>) {
        self.by_source.clear();
        self.by_target.clear();
        self.by_source_verb_type.clear();
        self.endpoints.clear();
        for (verb_id, source_id, target_id, verb_type) in verbs {
            self.add_verb(verb_id, source_id, target_id, verb_type);
        }
    }

    /// The other endpoint of `verb_id`, used only to resolve traversal
    /// targets; not an authoritative query path (the three postings are).
    pub fn endpoints(&self, verb_id: EntityId) -> Option<(EntityId, EntityId, VerbType)> {
        self.endpoints.get(&verb_id).map(|e| *e)
    }

    /// Every verb id currently indexed, for tree snapshots and rebuilds.
    pub fn all_verb_ids(&self) -> Vec<EntityId> {
        self.endpoints.iter().map(|e| *e.key()).collect()
    }

    /// Snapshot-clones the postings for a forked branch (spec.md §4.9 fork
    /// step 3). Unlike `Hnsw::fork`, there is no COW sharing here: the
    /// postings are cheap enough to clone outright, and a child branch's
    /// subsequent `add_verb`/`remove_verb` calls never touch the parent's.
    pub fn fork(&self) -> GraphIndex {
        GraphIndex {
            by_source: self.by_source.clone(),
            by_target: self.by_target.clone(),
            by_source_verb_type: self.by_source_verb_type.clone(),
            endpoints: self.endpoints.clone(),
        }
    }

    pub fn verbs_from(&self, source_id: EntityId) -> HashSet<EntityId> {
        self.by_source
            .get(&source_id)
            .map(|s| s.iter().map(|e| *e).collect())
            .unwrap_or_default()
    }

    pub fn verbs_to(&self, target_id: EntityId) -> HashSet<EntityId> {
        self.by_target
            .get(&target_id)
            .map(|s| s.iter().map(|e| *e).collect())
            .unwrap_or_default()
    }

    /// The authoritative fast path for a filter naming both `sourceId` and
    /// `verbType`: goes straight to the combined posting instead of
    /// intersecting `verbs_from` with a separate by-type scan.
    pub fn verbs_from_with_type(&self, source_id: EntityId, verb_type: VerbType) -> HashSet<EntityId> {
        self.by_source_verb_type
            .get(&(source_id, verb_type))
            .map(|s| s.iter().map(|e| *e).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novadb_core::VerbType;

    #[test]
    fn combined_posting_is_authoritative_for_source_and_type() {
        let idx = GraphIndex::new();
        let source = EntityId::new();
        let other_source = EntityId::new();
        let target = EntityId::new();
        let v1 = EntityId::new();
        let v2 = EntityId::new();

        idx.add_verb(v1, source, target, VerbType::References);
        idx.add_verb(v2, source, target, VerbType::DependsOn);
        idx.add_verb(EntityId::new(), other_source, target, VerbType::References);

        let refs_from_source = idx.verbs_from_with_type(source, VerbType::References);
        assert_eq!(refs_from_source, HashSet::from([v1]));
        assert!(!refs_from_source.contains(&v2));
    }

    #[test]
    fn remove_verb_clears_all_three_postings() {
        let idx = GraphIndex::new();
        let source = EntityId::new();
        let target = EntityId::new();
        let verb = EntityId::new();
        idx.add_verb(verb, source, target, VerbType::Owns);
        idx.remove_verb(verb, source, target, VerbType::Owns);

        assert!(idx.verbs_from(source).is_empty());
        assert!(idx.verbs_to(target).is_empty());
        assert!(idx.verbs_from_with_type(source, VerbType::Owns).is_empty());
    }

    #[test]
    fn verbs_to_tracks_target_regardless_of_type() {
        let idx = GraphIndex::new();
        let source = EntityId::new();
        let target = EntityId::new();
        let v1 = EntityId::new();
        let v2 = EntityId::new();
        idx.add_verb(v1, source, target, VerbType::Owns);
        idx.add_verb(v2, source, target, VerbType::Mentions);
        assert_eq!(idx.verbs_to(target), HashSet::from([v1, v2]));
    }
}
