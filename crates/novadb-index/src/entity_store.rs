//! Entity store (C6, spec.md §4.4): persists nouns, verbs and HNSW state
//! under a type-first sharded layout on top of C4/C1.

use bytes::Bytes;
use novadb_core::{EntityId, HnswNodeState, HnswSystemState, Noun, NounType, Value, Verb, VerbType};
use novadb_storage::{ObjectStore, ObjectStoreError, Result, WriteThroughCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything about a noun except its vector, persisted as the metadata
/// sibling file next to `vectors/<shard>/<id>.bin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NounMetadataFile {
    id: EntityId,
    noun_type: NounType,
    metadata: Value,
    created_at: i64,
    updated_at: i64,
    service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VerbMetadataFile {
    id: EntityId,
    source_id: EntityId,
    target_id: EntityId,
    verb_type: VerbType,
    weight: Option<f32>,
    confidence: Option<f32>,
    metadata: Value,
    created_at: i64,
    updated_at: i64,
}

pub struct EntityStore<S: ObjectStore> {
    cache: Arc<WriteThroughCache<S>>,
    store: Arc<S>,
    branch: String,
    parent_branch: Option<String>,
}

/// Length-prefixed little-endian `float32` array (spec.md §6): a 4-byte LE
/// `u32` dimension header followed by `4*D` bytes.
fn vector_to_bytes(v: &[f32]) -> Bytes {
    let mut buf = Vec::with_capacity(4 + v.len() * 4);
    buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
    for x in v {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    Bytes::from(buf)
}

fn bytes_to_vector(b: &[u8]) -> Result<Vec<f32>> {
    if b.len() < 4 {
        return Err(ObjectStoreError::Permanent(format!(
            "vector file too short to hold a dimension header: {} bytes",
            b.len()
        )));
    }
    let (header, rest) = b.split_at(4);
    let dimension = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let expected = dimension * 4;
    if rest.len() != expected {
        return Err(ObjectStoreError::Permanent(format!(
            "vector file declares dimension {dimension} ({expected} bytes) but has {} bytes of data",
            rest.len()
        )));
    }
    Ok(rest
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl<S: ObjectStore + 'static> EntityStore<S> {
    pub fn new(cache: Arc<WriteThroughCache<S>>, store: Arc<S>, branch: impl Into<String>) -> Self {
        Self {
            cache,
            store,
            branch: branch.into(),
            parent_branch: None,
        }
    }

    /// Enables COW inheritance: reads fall through to `parent`'s paths when
    /// this branch has no local copy (spec.md §4.9 fork step 3).
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_branch = Some(parent.into());
        self
    }

    fn branch_key(&self, rel: &str) -> String {
        format!("branches/{}/{}", self.branch, rel)
    }

    fn parent_key(&self, rel: &str) -> Option<(String, String)> {
        self.parent_branch
            .as_ref()
            .map(|p| (p.clone(), format!("branches/{p}/{rel}")))
    }

    async fn read_rel(&self, rel: &str) -> Result<Option<Bytes>> {
        let key = self.branch_key(rel);
        let parent = self.parent_key(rel);
        self.cache
            .read(
                &self.branch,
                &key,
                parent.as_ref().map(|(b, k)| (b.as_str(), k.as_str())),
            )
            .await
    }

    async fn write_rel(&self, rel: &str, bytes: Bytes) -> Result<()> {
        let key = self.branch_key(rel);
        self.cache.write(&self.branch, &key, bytes).await
    }

    fn noun_vector_rel(t: NounType, id: EntityId) -> String {
        format!("entities/nouns/{}/vectors/{}/{}.bin", t.as_path_segment(), id.shard_tag(), id)
    }

    fn noun_metadata_rel(t: NounType, id: EntityId) -> String {
        format!("entities/nouns/{}/metadata/{}/{}.json", t.as_path_segment(), id.shard_tag(), id)
    }

    fn noun_hnsw_rel(t: NounType, id: EntityId) -> String {
        format!("entities/nouns/{}/hnsw/{}/{}.json", t.as_path_segment(), id.shard_tag(), id)
    }

    fn verb_metadata_rel(t: VerbType, id: EntityId) -> String {
        format!("entities/verbs/{}/metadata/{}/{}.json", verb_path_segment(t), id.shard_tag(), id)
    }

    fn verb_vector_rel(t: VerbType, id: EntityId) -> String {
        format!("entities/verbs/{}/vectors/{}/{}.bin", verb_path_segment(t), id.shard_tag(), id)
    }

    const HNSW_SYSTEM_REL: &'static str = "system/hnsw.json";

    pub async fn save_noun(&self, noun: &Noun) -> Result<()> {
        let file = NounMetadataFile {
            id: noun.id,
            noun_type: noun.noun_type,
            metadata: noun.metadata.clone(),
            created_at: noun.created_at,
            updated_at: noun.updated_at,
            service: noun.service.clone(),
        };
        let metadata_bytes = Bytes::from(serde_json::to_vec(&file).expect("noun metadata serializes"));
        self.write_rel(&Self::noun_metadata_rel(noun.noun_type, noun.id), metadata_bytes)
            .await?;
        self.write_rel(&Self::noun_vector_rel(noun.noun_type, noun.id), vector_to_bytes(&noun.vector))
            .await
    }

    pub async fn get_noun(&self, noun_type: NounType, id: EntityId) -> Result<Option<Noun>> {
        let metadata_bytes = self.read_rel(&Self::noun_metadata_rel(noun_type, id)).await?;
        let Some(metadata_bytes) = metadata_bytes else {
            return Ok(None);
        };
        let file: NounMetadataFile =
            serde_json::from_slice(&metadata_bytes).expect("stored noun metadata is valid");
        let vector = self
            .read_rel(&Self::noun_vector_rel(noun_type, id))
            .await?
            .map(|b| bytes_to_vector(&b))
            .transpose()?
            .unwrap_or_default();
        Ok(Some(Noun {
            id: file.id,
            noun_type: file.noun_type,
            vector,
            metadata: file.metadata,
            created_at: file.created_at,
            updated_at: file.updated_at,
            service: file.service,
        }))
    }

    pub async fn delete_noun(&self, noun_type: NounType, id: EntityId) -> Result<()> {
        let _ = self.store.delete(&self.branch_key(&Self::noun_metadata_rel(noun_type, id))).await;
        let _ = self.store.delete(&self.branch_key(&Self::noun_vector_rel(noun_type, id))).await;
        let _ = self.store.delete(&self.branch_key(&Self::noun_hnsw_rel(noun_type, id))).await;
        Ok(())
    }

    pub async fn save_verb(&self, verb: &Verb) -> Result<()> {
        let file = VerbMetadataFile {
            id: verb.id,
            source_id: verb.source_id,
            target_id: verb.target_id,
            verb_type: verb.verb_type,
            weight: verb.weight,
            confidence: verb.confidence,
            metadata: verb.metadata.clone(),
            created_at: verb.created_at,
            updated_at: verb.updated_at,
        };
        let metadata_bytes = Bytes::from(serde_json::to_vec(&file).expect("verb metadata serializes"));
        self.write_rel(&Self::verb_metadata_rel(verb.verb_type, verb.id), metadata_bytes)
            .await?;
        if !verb.vector.is_empty() {
            self.write_rel(&Self::verb_vector_rel(verb.verb_type, verb.id), vector_to_bytes(&verb.vector))
                .await?;
        }
        Ok(())
    }

    pub async fn get_verb(&self, verb_type: VerbType, id: EntityId) -> Result<Option<Verb>> {
        let metadata_bytes = self.read_rel(&Self::verb_metadata_rel(verb_type, id)).await?;
        let Some(metadata_bytes) = metadata_bytes else {
            return Ok(None);
        };
        let file: VerbMetadataFile =
            serde_json::from_slice(&metadata_bytes).expect("stored verb metadata is valid");
        let vector = self
            .read_rel(&Self::verb_vector_rel(verb_type, id))
            .await?
            .map(|b| bytes_to_vector(&b))
            .transpose()?
            .unwrap_or_default();
        Ok(Some(Verb {
            id: file.id,
            source_id: file.source_id,
            target_id: file.target_id,
            verb_type: file.verb_type,
            vector,
            weight: file.weight,
            confidence: file.confidence,
            metadata: file.metadata,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }))
    }

    pub async fn delete_verb(&self, verb_type: VerbType, id: EntityId) -> Result<()> {
        let _ = self.store.delete(&self.branch_key(&Self::verb_metadata_rel(verb_type, id))).await;
        let _ = self.store.delete(&self.branch_key(&Self::verb_vector_rel(verb_type, id))).await;
        Ok(())
    }

    /// All `saveHNSW*` operations acquire the per-key mutex via
    /// `read_modify_write`, so concurrent neighbor rewrites never lose an
    /// update (spec.md §4.4, §4.8).
    pub async fn update_hnsw_node(
        &self,
        noun_type: NounType,
        id: EntityId,
        f: impl FnOnce(&mut HnswNodeState) + Send + 'static,
    ) -> Result<()> {
        let rel = Self::noun_hnsw_rel(noun_type, id);
        let key = self.branch_key(&rel);
        let parent = self.parent_key(&rel);
        self.cache
            .read_modify_write(
                &self.branch,
                &key,
                parent.as_ref().map(|(b, k)| (b.as_str(), k.as_str())),
                move |current| async move {
                    let mut state: HnswNodeState = current
                        .map(|b| serde_json::from_slice(&b).expect("stored hnsw node is valid"))
                        .unwrap_or_default();
                    f(&mut state);
                    Ok(Bytes::from(serde_json::to_vec(&state).expect("hnsw node serializes")))
                },
            )
            .await
    }

    pub async fn get_hnsw_node(&self, noun_type: NounType, id: EntityId) -> Result<Option<HnswNodeState>> {
        let bytes = self.read_rel(&Self::noun_hnsw_rel(noun_type, id)).await?;
        Ok(bytes.map(|b| serde_json::from_slice(&b).expect("stored hnsw node is valid")))
    }

    pub async fn update_hnsw_system(
        &self,
        f: impl FnOnce(&mut HnswSystemState) + Send + 'static,
    ) -> Result<()> {
        let key = self.branch_key(Self::HNSW_SYSTEM_REL);
        let parent = self.parent_key(Self::HNSW_SYSTEM_REL);
        self.cache
            .read_modify_write(
                &self.branch,
                &key,
                parent.as_ref().map(|(b, k)| (b.as_str(), k.as_str())),
                move |current| async move {
                    let mut state: HnswSystemState = current
                        .map(|b| serde_json::from_slice(&b).expect("stored hnsw system state is valid"))
                        .unwrap_or_default();
                    f(&mut state);
                    Ok(Bytes::from(serde_json::to_vec(&state).expect("hnsw system state serializes")))
                },
            )
            .await
    }

    pub async fn get_hnsw_system(&self) -> Result<HnswSystemState> {
        let bytes = self.read_rel(Self::HNSW_SYSTEM_REL).await?;
        Ok(bytes
            .map(|b| serde_json::from_slice(&b).expect("stored hnsw system state is valid"))
            .unwrap_or_default())
    }

    /// Lists every noun id of `noun_type` via a type-first prefix list,
    /// unioning this branch's own entries with the parent's (COW
    /// inheritance for reads; see spec.md §4.9).
    pub async fn list_nouns_by_type(&self, noun_type: NounType) -> Result<Vec<EntityId>> {
        let own_prefix = self.branch_key(&format!("entities/nouns/{}/metadata/", noun_type.as_path_segment()));
        let mut ids = self.list_ids_under(&own_prefix).await?;
        if let Some(parent) = &self.parent_branch {
            let parent_prefix = format!("branches/{}/entities/nouns/{}/metadata/", parent, noun_type.as_path_segment());
            for id in self.list_ids_under(&parent_prefix).await? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Mirrors `list_nouns_by_type` for verbs; used to rehydrate the graph
    /// index after a process restart.
    pub async fn list_verbs_by_type(&self, verb_type: VerbType) -> Result<Vec<EntityId>> {
        let own_prefix = self.branch_key(&format!("entities/verbs/{}/metadata/", verb_path_segment(verb_type)));
        let mut ids = self.list_ids_under(&own_prefix).await?;
        if let Some(parent) = &self.parent_branch {
            let parent_prefix = format!("branches/{}/entities/verbs/{}/metadata/", parent, verb_path_segment(verb_type));
            for id in self.list_ids_under(&parent_prefix).await? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    async fn list_ids_under(&self, prefix: &str) -> Result<Vec<EntityId>> {
        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store.list(prefix, cursor.as_deref(), 1000).await?;
            for key in &page.keys {
                if let Some(file_name) = key.rsplit('/').next() {
                    if let Some(id_str) = file_name.strip_suffix(".json") {
                        if let Ok(id) = id_str.parse::<EntityId>() {
                            ids.push(id);
                        }
                    }
                }
            }
            if page.next_cursor.is_none() {
                break;
            }
            cursor = page.next_cursor;
        }
        Ok(ids)
    }
}

fn verb_path_segment(t: VerbType) -> &'static str {
    match t {
        VerbType::References => "references",
        VerbType::RelatesTo => "relates_to",
        VerbType::DependsOn => "depends_on",
        VerbType::Contains => "contains",
        VerbType::PartOf => "part_of",
        VerbType::Owns => "owns",
        VerbType::CreatedBy => "created_by",
        VerbType::ModifiedBy => "modified_by",
        VerbType::AssignedTo => "assigned_to",
        VerbType::Mentions => "mentions",
        VerbType::Follows => "follows",
        VerbType::LikedBy => "liked_by",
        VerbType::CommentedOn => "commented_on",
        VerbType::Replies => "replies",
        VerbType::Links => "links",
        VerbType::Cites => "cites",
        VerbType::Derives => "derives",
        VerbType::Implements => "implements",
        VerbType::Extends => "extends",
        VerbType::Uses => "uses",
        VerbType::Produces => "produces",
        VerbType::Consumes => "consumes",
        VerbType::Triggers => "triggers",
        VerbType::Blocks => "blocks",
        VerbType::Requires => "requires",
        VerbType::Supports => "supports",
        VerbType::Contradicts => "contradicts",
        VerbType::Precedes => "precedes",
        VerbType::Succeeds => "succeeds",
        VerbType::LocatedAt => "located_at",
        VerbType::WorksAt => "works_at",
        VerbType::MemberOf => "member_of",
        VerbType::ManagedBy => "managed_by",
        VerbType::Authored => "authored",
        VerbType::Reviewed => "reviewed",
        VerbType::Approved => "approved",
        VerbType::Rejected => "rejected",
        VerbType::Shared => "shared",
        VerbType::Tagged => "tagged",
        VerbType::Other => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novadb_storage_memory::MemoryStore;

    fn sample_noun() -> Noun {
        Noun {
            id: EntityId::new(),
            noun_type: NounType::Person,
            vector: vec![1.0, 2.0, 3.0],
            metadata: Value::Obj(Default::default()),
            created_at: 0,
            updated_at: 0,
            service: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_noun_roundtrips() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(WriteThroughCache::new(store.clone()));
        let entity_store = EntityStore::new(cache, store, "main");
        let noun = sample_noun();
        entity_store.save_noun(&noun).await.unwrap();
        let got = entity_store.get_noun(noun.noun_type, noun.id).await.unwrap().unwrap();
        assert_eq!(got.vector, noun.vector);
    }

    #[tokio::test]
    async fn hnsw_node_read_modify_write_preserves_level() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(WriteThroughCache::new(store.clone()));
        let entity_store = EntityStore::new(cache, store, "main");
        let id = EntityId::new();
        entity_store
            .update_hnsw_node(NounType::Person, id, |s| s.level = 2)
            .await
            .unwrap();
        entity_store
            .update_hnsw_node(NounType::Person, id, |s| {
                s.connections.entry(0).or_default().insert(EntityId::new());
            })
            .await
            .unwrap();
        let node = entity_store.get_hnsw_node(NounType::Person, id).await.unwrap().unwrap();
        assert_eq!(node.level, 2);
        assert_eq!(node.connections.get(&0).map(|s| s.len()), Some(1));
    }

    #[tokio::test]
    async fn child_branch_inherits_parent_noun_via_cow() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(WriteThroughCache::new(store.clone()));
        let parent_store = EntityStore::new(cache.clone(), store.clone(), "main");
        let noun = sample_noun();
        parent_store.save_noun(&noun).await.unwrap();

        let child_store = EntityStore::new(cache, store, "feature").with_parent("main");
        let got = child_store.get_noun(noun.noun_type, noun.id).await.unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn vector_encoding_is_length_prefixed() {
        let bytes = vector_to_bytes(&[1.0, 2.0, 3.0]);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(bytes.len(), 4 + 3 * 4);
        assert_eq!(bytes_to_vector(&bytes).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn truncated_vector_file_is_an_error_not_a_silent_short_read() {
        let mut bytes = vector_to_bytes(&[1.0, 2.0, 3.0]).to_vec();
        bytes.truncate(bytes.len() - 4);
        assert!(bytes_to_vector(&bytes).is_err());
    }
}
