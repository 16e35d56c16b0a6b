//! HNSW approximate nearest-neighbor index (C9, spec.md §4.8). One instance
//! is kept per noun type (type-aware partitioning); `MultiHnsw` fans out
//! across types and k-way merges the results.

use dashmap::DashMap;
use dashmap::DashSet;
use novadb_core::EntityId;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Semaphore};

#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_concurrent_neighbor_writes: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            m_max0: m * 2,
            ef_construction: 200,
            ef_search: 64,
            max_concurrent_neighbor_writes: 32,
        }
    }
}

impl HnswParams {
    fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

struct Node {
    vector: Vec<f32>,
    /// layer -> neighbor ids, mutated only while this node's own mutex is
    /// held (the "C4 mutex on this id" in the insert algorithm).
    connections: RwLock<Vec<HashSet<EntityId>>>,
    level: usize,
    lock: Mutex<()>,
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

#[derive(Clone, Copy, PartialEq)]
struct ScoredId {
    id: EntityId,
    distance: f32,
}
impl Eq for ScoredId {}
impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.partial_cmp(&other.distance).unwrap_or(Ordering::Equal)
    }
}
impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-type HNSW graph. Supports O(1) COW forking per spec.md §4.8: a
/// child shares `parent`'s node map by reference and only materializes
/// nodes it mutates into its own `owned` map.
pub struct Hnsw {
    params: HnswParams,
    owned: DashMap<EntityId, Arc<Node>>,
    parent: Option<Arc<Hnsw>>,
    tombstones: DashSet<EntityId>,
    entry_point: RwLock<Option<EntityId>>,
    max_level: AtomicUsize,
    system_lock: Mutex<()>,
    neighbor_write_limiter: Arc<Semaphore>,
}

impl Hnsw {
    pub fn new(params: HnswParams) -> Self {
        Self {
            neighbor_write_limiter: Arc::new(Semaphore::new(params.max_concurrent_neighbor_writes)),
            params,
            owned: DashMap::new(),
            parent: None,
            tombstones: DashSet::new(),
            entry_point: RwLock::new(None),
            max_level: AtomicUsize::new(0),
        }
    }

    /// O(1) in the node map: shares `self` by reference, eagerly copies the
    /// tiny system state (entry point, max level), and starts with an empty
    /// owned map that fills in lazily as the fork is mutated.
    pub fn fork(self: &Arc<Self>) -> Hnsw {
        Hnsw {
            neighbor_write_limiter: Arc::new(Semaphore::new(self.params.max_concurrent_neighbor_writes)),
            params: self.params,
            owned: DashMap::new(),
            parent: Some(self.clone()),
            tombstones: self.tombstones.clone(),
            entry_point: RwLock::new(*self.entry_point.read().unwrap()),
            max_level: AtomicUsize::new(self.max_level.load(AtomicOrdering::Relaxed)),
        }
    }

    fn node(&self, id: EntityId) -> Option<Arc<Node>> {
        if let Some(n) = self.owned.get(&id) {
            return Some(n.clone());
        }
        self.parent.as_ref().and_then(|p| p.node(id))
    }

    /// Lazy deep-copy on write: clones a parent-owned node into this
    /// branch's own map before it is mutated, per `ensureCOW(nodeId)`.
    fn ensure_cow(&self, id: EntityId) -> Arc<Node> {
        if let Some(n) = self.owned.get(&id) {
            return n.clone();
        }
        let cloned = match self.node(id) {
            Some(parent_node) => Arc::new(Node {
                vector: parent_node.vector.clone(),
                connections: RwLock::new(parent_node.connections.read().unwrap().clone()),
                level: parent_node.level,
                lock: Mutex::new(()),
            }),
            None => Arc::new(Node {
                vector: Vec::new(),
                connections: RwLock::new(Vec::new()),
                level: 0,
                lock: Mutex::new(()),
            }),
        };
        self.owned.insert(id, cloned.clone());
        cloned
    }

    fn draw_level(&self) -> usize {
        let uniform: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        (-uniform.ln() * self.params.level_multiplier()).floor() as usize
    }

    fn cap_for_layer(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    /// Bounded best-first search for `ef` candidates nearest `query` within
    /// one layer, starting from `entry`.
    fn search_layer(&self, query: &[f32], entry: EntityId, layer: usize, ef: usize) -> Vec<ScoredId> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_dist = self
            .node(entry)
            .map(|n| cosine_distance(query, &n.vector))
            .unwrap_or(f32::MAX);

        let mut candidates = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(ScoredId { id: entry, distance: entry_dist }));
        let mut results = BinaryHeap::new();
        if !self.tombstones.contains(&entry) {
            results.push(ScoredId { id: entry, distance: entry_dist });
        }

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            if let Some(worst) = results.peek() {
                if results.len() >= ef && current.distance > worst.distance {
                    break;
                }
            }
            let Some(node) = self.node(current.id) else { continue };
            let conns = node.connections.read().unwrap();
            if layer >= conns.len() {
                continue;
            }
            for &neighbor in conns[layer].iter() {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(n) = self.node(neighbor) else { continue };
                let dist = cosine_distance(query, &n.vector);
                let should_consider = results.len() < ef
                    || results.peek().map(|w| dist < w.distance).unwrap_or(true);
                if should_consider {
                    candidates.push(std::cmp::Reverse(ScoredId { id: neighbor, distance: dist }));
                    if !self.tombstones.contains(&neighbor) {
                        results.push(ScoredId { id: neighbor, distance: dist });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<ScoredId> = results.into_vec();
        out.sort();
        out
    }

    /// Prefers diverse directions: a candidate is accepted only if no
    /// already-selected neighbor is strictly closer to it than the query is.
    fn select_neighbors_heuristic(&self, query: &[f32], candidates: Vec<ScoredId>, cap: usize) -> Vec<EntityId> {
        let mut selected: Vec<ScoredId> = Vec::new();
        for cand in candidates {
            if selected.len() >= cap {
                break;
            }
            let Some(cand_node) = self.node(cand.id) else { continue };
            let dominated = selected.iter().any(|s| {
                self.node(s.id)
                    .map(|s_node| cosine_distance(&s_node.vector, &cand_node.vector) < cand.distance)
                    .unwrap_or(false)
            });
            if !dominated {
                selected.push(cand);
            }
        }
        selected.into_iter().map(|s| s.id).collect()
    }

    pub async fn insert(&self, id: EntityId, vector: &[f32]) {
        let vector = normalize(vector);
        let level = self.draw_level();

        let entry = *self.entry_point.read().unwrap();
        let Some(entry_id) = entry else {
            let node = Arc::new(Node {
                vector,
                connections: RwLock::new(vec![HashSet::new(); level + 1]),
                level,
                lock: Mutex::new(()),
            });
            self.owned.insert(id, node);
            let _guard = self.system_lock.lock().await;
            *self.entry_point.write().unwrap() = Some(id);
            self.max_level.store(level, AtomicOrdering::Relaxed);
            return;
        };

        let max_level = self.max_level.load(AtomicOrdering::Relaxed);
        let mut current_nearest = entry_id;
        for layer in (level + 1..=max_level).rev() {
            let found = self.search_layer(&vector, current_nearest, layer, 1);
            if let Some(best) = found.first() {
                current_nearest = best.id;
            }
        }

        let mut connections = vec![HashSet::new(); level + 1];
        for layer in (0..=level.min(max_level)).rev() {
            let candidates = self.search_layer(&vector, current_nearest, layer, self.params.ef_construction);
            if let Some(best) = candidates.first() {
                current_nearest = best.id;
            }
            let cap = self.cap_for_layer(layer);
            let chosen = self.select_neighbors_heuristic(&vector, candidates, cap);
            connections[layer] = chosen.iter().copied().collect();

            let permits = self.neighbor_write_limiter.clone();
            for &neighbor in &chosen {
                let Ok(_permit) = permits.acquire().await else { continue };
                self.rewire_neighbor(neighbor, id, layer, cap).await;
            }
        }

        let node = Arc::new(Node {
            vector,
            connections: RwLock::new(connections),
            level,
            lock: Mutex::new(()),
        });
        self.owned.insert(id, node);

        if level > max_level {
            let _guard = self.system_lock.lock().await;
            if level > self.max_level.load(AtomicOrdering::Relaxed) {
                self.max_level.store(level, AtomicOrdering::Relaxed);
                *self.entry_point.write().unwrap() = Some(id);
            }
        }
    }

    /// Adds `new_id` to `neighbor`'s connections at `layer`, pruning with the
    /// same heuristic if the cap is exceeded. Failure here (neighbor since
    /// deleted) is a soft error: the insert that triggered it still
    /// succeeds, per the "eventual" bidirectionality invariant.
    async fn rewire_neighbor(&self, neighbor: EntityId, new_id: EntityId, layer: usize, cap: usize) {
        if self.node(neighbor).is_none() {
            return;
        }
        let node = self.ensure_cow(neighbor);
        let _guard = node.lock.lock().await;
        let mut conns = node.connections.write().unwrap();
        while conns.len() <= layer {
            conns.push(HashSet::new());
        }
        conns[layer].insert(new_id);
        if conns[layer].len() > cap {
            let query = &node.vector;
            let scored: Vec<ScoredId> = conns[layer]
                .iter()
                .filter_map(|&n| self.node(n).map(|nn| ScoredId { id: n, distance: cosine_distance(query, &nn.vector) }))
                .collect();
            let mut sorted = scored;
            sorted.sort();
            let pruned = self.select_neighbors_heuristic(query, sorted, cap);
            conns[layer] = pruned.into_iter().collect();
        }
    }

    pub fn search_knn(&self, query: &[f32], k: usize) -> Vec<(EntityId, f32)> {
        let query = normalize(query);
        let Some(entry) = *self.entry_point.read().unwrap() else {
            return Vec::new();
        };
        let max_level = self.max_level.load(AtomicOrdering::Relaxed);
        let mut current = entry;
        for layer in (1..=max_level).rev() {
            let found = self.search_layer(&query, current, layer, 1);
            if let Some(best) = found.first() {
                current = best.id;
            }
        }
        let ef = self.params.ef_search.max(k);
        let mut results = self.search_layer(&query, current, 0, ef);
        results.truncate(k);
        results.into_iter().map(|s| (s.id, s.distance)).collect()
    }

    /// `searchAmong`: filters the traversal to `candidates`; below
    /// `linear_scan_threshold` candidates it falls back to a plain linear
    /// scan, since graph traversal overhead dominates at small scale.
    pub fn search_among(&self, query: &[f32], candidates: &HashSet<EntityId>, k: usize) -> Vec<(EntityId, f32)> {
        const LINEAR_SCAN_THRESHOLD: usize = 64;
        let query = normalize(query);
        let mut scored: Vec<ScoredId> = if candidates.len() <= LINEAR_SCAN_THRESHOLD {
            candidates
                .iter()
                .filter(|id| !self.tombstones.contains(id))
                .filter_map(|&id| self.node(id).map(|n| ScoredId { id, distance: cosine_distance(&query, &n.vector) }))
                .collect()
        } else {
            let Some(entry) = *self.entry_point.read().unwrap() else {
                return Vec::new();
            };
            let ef = self.params.ef_search.max(k).max(candidates.len().min(256));
            self.search_layer(&query, entry, 0, ef)
                .into_iter()
                .filter(|s| candidates.contains(&s.id))
                .collect()
        };
        scored.sort();
        scored.truncate(k);
        scored.into_iter().map(|s| (s.id, s.distance)).collect()
    }

    pub fn delete(&self, id: EntityId) {
        self.tombstones.insert(id);
    }

    pub fn is_tombstoned(&self, id: EntityId) -> bool {
        self.tombstones.contains(&id)
    }
}

/// Fans an operation out across one `Hnsw` per noun type and k-way merges
/// search results (spec.md §4.8 "type-aware partitioning").
#[derive(Default)]
pub struct MultiHnsw {
    by_type: DashMap<novadb_core::NounType, Arc<Hnsw>>,
    params: HnswParams,
}

impl MultiHnsw {
    pub fn new(params: HnswParams) -> Self {
        Self { by_type: DashMap::new(), params }
    }

    pub fn for_type(&self, noun_type: novadb_core::NounType) -> Arc<Hnsw> {
        self.by_type
            .entry(noun_type)
            .or_insert_with(|| Arc::new(Hnsw::new(self.params)))
            .clone()
    }

    /// Forks every type-partitioned graph that exists so far via `Hnsw::fork`
    /// (O(1) COW each); types with no activity yet are lazily created fresh
    /// by `for_type` in either branch.
    pub fn fork(&self) -> MultiHnsw {
        let by_type = DashMap::new();
        for entry in self.by_type.iter() {
            by_type.insert(*entry.key(), Arc::new(entry.value().fork()));
        }
        MultiHnsw { by_type, params: self.params }
    }

    pub fn search_knn_all(&self, query: &[f32], k: usize) -> Vec<(EntityId, f32)> {
        let mut merged: Vec<(EntityId, f32)> = self
            .by_type
            .iter()
            .flat_map(|entry| entry.value().search_knn(query, k))
            .collect();
        merged.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        merged.truncate(k);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_search_finds_itself() {
        let idx = Hnsw::new(HnswParams::default());
        let id = EntityId::new();
        idx.insert(id, &[1.0, 0.0, 0.0]).await;
        let results = idx.search_knn(&[1.0, 0.0, 0.0], 1);
        assert_eq!(results[0].0, id);
        assert!(results[0].1 < 1e-4);
    }

    #[tokio::test]
    async fn search_returns_nearest_first() {
        let idx = Hnsw::new(HnswParams::default());
        let close = EntityId::new();
        let far = EntityId::new();
        idx.insert(close, &[1.0, 0.0, 0.0]).await;
        idx.insert(far, &[0.0, 1.0, 0.0]).await;
        let results = idx.search_knn(&[0.9, 0.1, 0.0], 2);
        assert_eq!(results[0].0, close);
    }

    #[tokio::test]
    async fn deleted_ids_are_excluded_from_search() {
        let idx = Hnsw::new(HnswParams::default());
        let id = EntityId::new();
        idx.insert(id, &[1.0, 0.0, 0.0]).await;
        idx.delete(id);
        let results = idx.search_knn(&[1.0, 0.0, 0.0], 5);
        assert!(!results.iter().any(|(rid, _)| *rid == id));
    }

    #[tokio::test]
    async fn search_among_restricts_to_candidate_set() {
        let idx = Hnsw::new(HnswParams::default());
        let a = EntityId::new();
        let b = EntityId::new();
        idx.insert(a, &[1.0, 0.0, 0.0]).await;
        idx.insert(b, &[0.0, 1.0, 0.0]).await;
        let candidates = HashSet::from([b]);
        let results = idx.search_among(&[1.0, 0.0, 0.0], &candidates, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, b);
    }

    #[tokio::test]
    async fn fork_is_independent_of_parent_mutations() {
        let parent = Arc::new(Hnsw::new(HnswParams::default()));
        let existing = EntityId::new();
        parent.insert(existing, &[1.0, 0.0, 0.0]).await;

        let child = parent.fork();
        let new_in_parent = EntityId::new();
        parent.insert(new_in_parent, &[0.0, 1.0, 0.0]).await;

        assert!(child.node(existing).is_some());
        assert!(child.node(new_in_parent).is_none());
    }

    #[tokio::test]
    async fn concurrent_inserts_all_land() {
        let idx = Arc::new(Hnsw::new(HnswParams::default()));
        let mut handles = Vec::new();
        for i in 0..50u32 {
            let idx = idx.clone();
            handles.push(tokio::spawn(async move {
                let id = EntityId::new();
                let angle = i as f32 * 0.01;
                idx.insert(id, &[angle.cos(), angle.sin(), 0.0]).await;
                id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        let results = idx.search_knn(&[1.0, 0.0, 0.0], 50);
        for id in ids {
            assert!(results.iter().any(|(rid, _)| *rid == id));
        }
    }
}
