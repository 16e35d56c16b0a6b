//! The public engine facade (spec.md §6): wires the config, embedding and
//! hook collaborators and the retry policy together over the VCS managers
//! (C11) and per-branch indexes (C6-C10) into the full operation surface.
//!
//! Every data operation (`add`, `get`, `relate`, `find`, `commit`, `version.*`,
//! ...) routes its body through the registered [`HookChain`] (spec.md §6:
//! "the core calls registered hooks in priority order; each receives
//! `(opName, params, next)` and returns the result"). Session/handle-shape
//! operations (`fork`, `checkout`, mode switches) don't carry a meaningful
//! `(params, result)` pair for augmentation to act on and are left unhooked;
//! see DESIGN.md.

use crate::branch_context::BranchContext;
use crate::config::{EngineConfig, StorageKind};
use crate::embedding::EmbeddingProvider;
use crate::hooks::{from_envelope, to_envelope, BoxFuture, HookChain};
use crate::retry::{with_retry, with_timeout, RetryPolicy};
use dashmap::DashMap;
use novadb_core::{EntityId, NounType, NovaError, ObjectId, Result, Signature, Value, Verb, VerbType};
use novadb_index::{Filter, HnswParams};
use novadb_objects::{NounBuilder, VerbBuilder};
use novadb_query::{ConnectedSpec, Query, ScoredEntity};
use novadb_storage::{ObjectStore, WriteThroughCache};
use novadb_vcs::{BranchManager, CommitManager, Diff, PruneOptions, SaveOptions, VersionManager};
use novadb_write::{Backpressure, Band, Priority};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// What a caller supplies for a noun's or verb's vector: already embedded,
/// or raw text/bytes for the engine to embed via its `EmbeddingProvider`.
#[derive(Clone, Serialize, Deserialize)]
pub enum EmbedInput {
    Vector(Vec<f32>),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AddRequest {
    pub noun_type: NounType,
    pub data: EmbedInput,
    pub metadata: Option<Value>,
    pub service: Option<String>,
    pub id: Option<EntityId>,
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub data: Option<EmbedInput>,
    pub metadata: Option<Value>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RelateRequest {
    pub from: EntityId,
    pub to: EntityId,
    pub verb_type: VerbType,
    pub weight: Option<f32>,
    pub confidence: Option<f32>,
    pub metadata: Option<Value>,
    /// Also index the edge under the reverse direction, so
    /// `getRelations({from: to})` finds it too.
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RelationsQuery {
    pub from: Option<EntityId>,
    pub to: Option<EntityId>,
    pub verb_type: Option<VerbType>,
}

/// Read/write restriction an engine instance can be placed under
/// (spec.md §6 "operating modes"). `ReadOnly` blocks every mutation;
/// `WriteOnly` blocks the heavier fused-query surface (`find`) while still
/// allowing cheap point reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    #[default]
    Normal,
    ReadOnly,
    WriteOnly,
}

/// Object-count footprint for the current branch (spec.md §6 `getStatistics`
/// "storage"). Counting bytes would require every backend to report sizes,
/// which `ObjectStore` doesn't; object count via `list`'s pagination is the
/// cheapest thing every backend already supports uniformly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageFootprint {
    pub kind: StorageKind,
    pub object_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub noun_count: usize,
    pub verb_count: usize,
    pub branch_count: usize,
    pub dimension: Option<usize>,
    pub current_branch: String,
    pub storage: StorageFootprint,
    pub cache_hit_rate: f64,
    pub throttling: Band,
}

const ROOT_BRANCH: &str = "main";

/// Everything about an `Engine` that's shared across every handle forked
/// from the same `init` call. Kept behind one `Arc` so a handle's hook
/// terminal closures (which must be `'static`, per `HookChain::run`) can
/// capture a cheap clone of the whole collaborator set instead of borrowing
/// `&Engine`.
struct EngineInner<S: ObjectStore + 'static> {
    config: EngineConfig,
    store: Arc<S>,
    cache: Arc<WriteThroughCache<S>>,
    branches: Arc<BranchManager<S>>,
    commits: Arc<CommitManager<S>>,
    versions: Arc<VersionManager<S>>,
    embedding: Arc<dyn EmbeddingProvider>,
    hooks: Arc<HookChain>,
    backpressure: Arc<Backpressure>,
    retry_policy: RetryPolicy,
    hnsw_params: HnswParams,
    dimension: RwLock<Option<usize>>,
    mode: RwLock<OperatingMode>,
    contexts: DashMap<String, Arc<BranchContext<S>>>,
}

impl<S: ObjectStore + 'static> EngineInner<S> {
    fn ensure_writable(&self) -> Result<()> {
        if *self.mode.read().unwrap() == OperatingMode::ReadOnly {
            return Err(NovaError::ReadOnly(
                novadb_core::ErrorContext::new().with_detail("engine is read-only: writes are disabled"),
            ));
        }
        Ok(())
    }

    fn ensure_queryable(&self) -> Result<()> {
        if *self.mode.read().unwrap() == OperatingMode::WriteOnly {
            return Err(NovaError::ReadOnly(
                novadb_core::ErrorContext::new().with_detail("engine is write-only: find/similar/query are disabled"),
            ));
        }
        Ok(())
    }

    /// Returns the live context for `branch`, building and rehydrating it
    /// from storage the first time this process touches the branch.
    async fn ensure_context(&self, branch: &str) -> Result<Arc<BranchContext<S>>> {
        if let Some(ctx) = self.contexts.get(branch) {
            return Ok(ctx.clone());
        }
        let ctx = Arc::new(BranchContext::root(self.cache.clone(), self.store.clone(), branch.to_string(), self.hnsw_params));
        ctx.rehydrate().await?;
        Ok(self.contexts.entry(branch.to_string()).or_insert(ctx).clone())
    }

    fn lock_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Ok(());
        }
        let mut guard = self.dimension.write().unwrap();
        match *guard {
            Some(d) if d != vector.len() => Err(NovaError::invalid_input(format!(
                "vector dimension {} does not match the locked dimension {d}",
                vector.len()
            ))),
            Some(_) => Ok(()),
            None => {
                *guard = Some(vector.len());
                Ok(())
            }
        }
    }

    async fn resolve_vector(&self, data: EmbedInput) -> Result<Vec<f32>> {
        match data {
            EmbedInput::Vector(v) => Ok(v),
            EmbedInput::Text(text) => self.embedding.embed_text(&text).await,
            EmbedInput::Bytes(bytes) => self.embedding.embed_bytes(&bytes).await,
        }
    }

    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn find_noun(&self, branch: &str, id: EntityId) -> Result<Option<(NounType, novadb_core::Noun)>> {
        let ctx = self.ensure_context(branch).await?;
        for &noun_type in NounType::ALL {
            if let Some(noun) = ctx.entity_store.get_noun(noun_type, id).await? {
                return Ok(Some((noun_type, noun)));
            }
        }
        Ok(None)
    }

    /// Resolves a verb id to its `(type, body)` using the in-memory graph
    /// index first (authoritative for anything written this process), then
    /// falling back to a linear scan over `VerbType::ALL` for a verb that
    /// was only ever persisted by a prior process.
    async fn resolve_verb(&self, ctx: &BranchContext<S>, verb_id: EntityId) -> Result<Option<(VerbType, Verb)>> {
        if let Some((_, _, verb_type)) = ctx.graph_index.endpoints(verb_id) {
            return Ok(ctx.entity_store.get_verb(verb_type, verb_id).await?.map(|v| (verb_type, v)));
        }
        for &verb_type in VerbType::ALL {
            if let Some(verb) = ctx.entity_store.get_verb(verb_type, verb_id).await? {
                return Ok(Some((verb_type, verb)));
            }
        }
        Ok(None)
    }

    /// Counts objects under the current branch's prefix by walking `list`'s
    /// cursor pagination to exhaustion. O(objects / page) store round trips;
    /// fine for a stats call, not for a hot path.
    async fn count_objects(&self, branch: &str) -> Result<usize> {
        let prefix = format!("branches/{branch}/");
        let mut count = 0usize;
        let mut cursor: Option<String> = None;
        loop {
            let page = self.store.list(&prefix, cursor.as_deref(), 1000).await?;
            count += page.keys.len();
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(count)
    }

    // ---- entities (spec.md §6 "add"/"get"/"update"/"delete") ----

    async fn add_impl(&self, branch: &str, req: AddRequest) -> Result<EntityId> {
        self.ensure_writable()?;
        let vector = self.resolve_vector(req.data).await?;
        self.lock_dimension(&vector)?;

        let mut builder = NounBuilder::new(self.now_ms())
            .noun_type(req.noun_type)
            .vector(vector.clone())
            .metadata(req.metadata.unwrap_or(Value::Obj(Default::default())));
        if let Some(id) = req.id {
            builder = builder.id(id);
        }
        if let Some(service) = req.service {
            builder = builder.service(service);
        }
        let noun = builder.build().map_err(|e| NovaError::invalid_input(e.to_string()))?;

        let ctx = self.ensure_context(branch).await?;
        let permit = self.backpressure.request_permission(Priority::Normal).await;
        let write = with_timeout(
            self.config.timeouts.put(),
            with_retry(&self.retry_policy, || ctx.entity_store.save_noun(&noun)),
        )
        .await;
        self.backpressure.release(permit, write.is_ok());
        write?;

        ctx.metadata_index.add(noun.id, &noun.metadata);
        if !vector.is_empty() {
            ctx.hnsw.for_type(noun.noun_type).insert(noun.id, &vector).await;
        }
        Ok(noun.id)
    }

    async fn get_impl(&self, branch: &str, id: EntityId, include_vectors: bool) -> Result<Option<novadb_core::Noun>> {
        let permit = self.backpressure.request_permission(Priority::Read).await;
        let found = with_timeout(self.config.timeouts.get(), async { self.find_noun(branch, id).await }).await;
        self.backpressure.release(permit, found.is_ok());
        let found = found?;
        Ok(found.map(|(_, mut noun)| {
            if !include_vectors {
                noun.vector.clear();
            }
            noun
        }))
    }

    async fn has_impl(&self, branch: &str, id: EntityId) -> Result<bool> {
        Ok(self.find_noun(branch, id).await?.is_some())
    }

    async fn get_metadata_impl(&self, branch: &str, id: EntityId) -> Result<Option<Value>> {
        Ok(self.find_noun(branch, id).await?.map(|(_, n)| n.metadata))
    }

    async fn update_impl(&self, branch: &str, id: EntityId, req: UpdateRequest) -> Result<()> {
        self.ensure_writable()?;
        let Some((noun_type, mut noun)) = self.find_noun(branch, id).await? else {
            return Err(NovaError::not_found(format!("entity not found: {id}")));
        };
        let old_metadata = noun.metadata.clone();

        if let Some(data) = req.data {
            let vector = self.resolve_vector(data).await?;
            self.lock_dimension(&vector)?;
            noun.vector = vector;
        }
        if let Some(metadata) = req.metadata {
            noun.metadata = metadata;
        }
        noun.updated_at = self.now_ms();

        let ctx = self.ensure_context(branch).await?;
        let permit = self.backpressure.request_permission(Priority::Normal).await;
        let write = with_timeout(
            self.config.timeouts.put(),
            with_retry(&self.retry_policy, || ctx.entity_store.save_noun(&noun)),
        )
        .await;
        self.backpressure.release(permit, write.is_ok());
        write?;

        ctx.metadata_index.remove(id, &old_metadata);
        ctx.metadata_index.add(id, &noun.metadata);
        if !noun.vector.is_empty() {
            ctx.hnsw.for_type(noun_type).insert(id, &noun.vector).await;
        }
        Ok(())
    }

    async fn delete_impl(&self, branch: &str, id: EntityId) -> Result<()> {
        self.ensure_writable()?;
        let Some((noun_type, noun)) = self.find_noun(branch, id).await? else {
            return Err(NovaError::not_found(format!("entity not found: {id}")));
        };
        let ctx = self.ensure_context(branch).await?;
        let permit = self.backpressure.request_permission(Priority::Normal).await;
        let result = with_timeout(self.config.timeouts.delete(), ctx.entity_store.delete_noun(noun_type, id)).await;
        self.backpressure.release(permit, result.is_ok());
        result?;

        ctx.metadata_index.remove(id, &noun.metadata);
        ctx.hnsw.for_type(noun_type).delete(id);
        Ok(())
    }

    // ---- relations (spec.md §6 "relate"/"unrelate"/"getRelations") ----

    async fn relate_impl(&self, branch: &str, req: RelateRequest) -> Result<EntityId> {
        self.ensure_writable()?;
        if self.find_noun(branch, req.from).await?.is_none() {
            return Err(NovaError::invalid_input(format!("relate: source entity not found: {}", req.from)));
        }
        if self.find_noun(branch, req.to).await?.is_none() {
            return Err(NovaError::invalid_input(format!("relate: target entity not found: {}", req.to)));
        }

        let mut builder = VerbBuilder::new(self.now_ms())
            .source(req.from)
            .target(req.to)
            .verb_type(req.verb_type)
            .metadata(req.metadata.unwrap_or(Value::Obj(Default::default())));
        if let Some(weight) = req.weight {
            builder = builder.weight(weight);
        }
        if let Some(confidence) = req.confidence {
            builder = builder.confidence(confidence);
        }
        let verb = builder.build().map_err(|e| NovaError::invalid_input(e.to_string()))?;

        let ctx = self.ensure_context(branch).await?;
        let permit = self.backpressure.request_permission(Priority::Normal).await;
        let write = with_timeout(self.config.timeouts.put(), ctx.entity_store.save_verb(&verb)).await;
        self.backpressure.release(permit, write.is_ok());
        write?;

        ctx.graph_index.add_verb(verb.id, verb.source_id, verb.target_id, verb.verb_type);
        if req.bidirectional {
            ctx.graph_index.add_verb(verb.id, verb.target_id, verb.source_id, verb.verb_type);
        }
        Ok(verb.id)
    }

    async fn get_verb_impl(&self, branch: &str, verb_id: EntityId) -> Result<Option<Verb>> {
        let ctx = self.ensure_context(branch).await?;
        Ok(self.resolve_verb(&ctx, verb_id).await?.map(|(_, verb)| verb))
    }

    async fn unrelate_impl(&self, branch: &str, verb_id: EntityId) -> Result<()> {
        self.ensure_writable()?;
        let ctx = self.ensure_context(branch).await?;
        let Some((verb_type, verb)) = self.resolve_verb(&ctx, verb_id).await? else {
            return Err(NovaError::not_found(format!("verb not found: {verb_id}")));
        };
        ctx.entity_store.delete_verb(verb_type, verb_id).await?;
        ctx.graph_index.remove_verb(verb_id, verb.source_id, verb.target_id, verb_type);
        ctx.graph_index.remove_verb(verb_id, verb.target_id, verb.source_id, verb_type);
        Ok(())
    }

    /// Resolves `query` against the graph index's posting lists, then
    /// filters/materializes against the authoritative stored `Verb` rather
    /// than `endpoints()` a second time: a bidirectional edge is registered
    /// under both directions against the *same* verb id, so `endpoints()`
    /// only remembers whichever direction was registered last and cannot be
    /// trusted to tell which side is actually `source`/`target` for a given
    /// match.
    async fn get_relations_impl(&self, branch: &str, query: RelationsQuery) -> Result<Vec<Verb>> {
        let ctx = self.ensure_context(branch).await?;
        let verb_ids: Vec<EntityId> = match (query.from, query.to, query.verb_type) {
            (Some(from), _, Some(vt)) => ctx.graph_index.verbs_from_with_type(from, vt).into_iter().collect(),
            (Some(from), _, None) => ctx.graph_index.verbs_from(from).into_iter().collect(),
            (None, Some(to), _) => ctx.graph_index.verbs_to(to).into_iter().collect(),
            (None, None, _) => ctx.graph_index.all_verb_ids(),
        };

        let mut out = Vec::new();
        for verb_id in verb_ids {
            let Some((_, _, verb_type)) = ctx.graph_index.endpoints(verb_id) else { continue };
            if let Some(want) = query.verb_type {
                if want != verb_type {
                    continue;
                }
            }
            let Some(verb) = ctx.entity_store.get_verb(verb_type, verb_id).await? else { continue };
            if let Some(from) = query.from {
                if verb.source_id != from && verb.target_id != from {
                    continue;
                }
            }
            if let Some(to) = query.to {
                if verb.source_id != to && verb.target_id != to {
                    continue;
                }
            }
            out.push(verb);
        }
        Ok(out)
    }

    // ---- querying (spec.md §6 "find") ----

    async fn find_impl(&self, branch: &str, mut query: Query, like: Option<EmbedInput>) -> Result<Vec<ScoredEntity>> {
        self.ensure_queryable()?;
        if let Some(like) = like {
            query = query.with_similar(self.resolve_vector(like).await?);
        }
        let ctx = self.ensure_context(branch).await?;
        let permit = self.backpressure.request_permission(Priority::Read).await;
        let result = with_timeout(self.config.timeouts.get(), ctx.planner.find(&query)).await;
        self.backpressure.release(permit, result.is_ok());
        result
    }

    // ---- branching (spec.md §6 "listBranches"/"deleteBranch") ----

    async fn list_branches_impl(&self) -> Result<Vec<String>> {
        self.branches.list_branches().await
    }

    async fn delete_branch_impl(&self, name: &str, force: bool) -> Result<()> {
        self.ensure_writable()?;
        self.branches.delete_branch(name, force).await?;
        self.contexts.remove(name);
        Ok(())
    }

    // ---- commits (spec.md §6 "commit"/"getHistory") ----

    /// Commits the current branch's live state. Per `CommitManager::commit`'s
    /// contract, flushing write buffers first is the caller's job; this
    /// engine writes straight through `EntityStore` rather than buffering
    /// (see DESIGN.md), so there is nothing to flush here beyond waiting out
    /// any inflight permits, which `request_permission`/`release` already do.
    async fn commit_impl(&self, branch: &str, message: String, author: Signature) -> Result<ObjectId> {
        self.ensure_writable()?;
        let ctx = self.ensure_context(branch).await?;
        self.commits.commit(branch, message, author, ctx.as_ref()).await
    }

    async fn get_history_impl(&self, branch: &str, limit: Option<usize>) -> Result<Vec<novadb_core::Commit>> {
        self.commits.get_history(branch, limit).await
    }

    // ---- versioning (spec.md §6 "version.*") ----

    async fn version_save_impl(&self, branch: &str, id: EntityId, opts: SaveOptions) -> Result<novadb_core::VersionRecord> {
        self.ensure_writable()?;
        let Some((_, noun)) = self.find_noun(branch, id).await? else {
            return Err(NovaError::not_found(format!("entity not found: {id}")));
        };
        let payload = Value::from_json(serde_json::to_value(novadb_core::EntityRecord::Noun(noun)).expect("noun serializes"));
        self.versions.save(branch, id, &payload, opts).await
    }

    /// Restores `id` to the payload recorded at `version`, writing it back
    /// through the same path `add`/`update` use so the indexes stay in sync.
    async fn version_restore_impl(&self, branch: &str, id: EntityId, version: u64) -> Result<()> {
        self.ensure_writable()?;
        let payload = self.versions.get_payload(branch, id, version).await?;
        let bytes = serde_json::to_vec(&payload).map_err(|e| NovaError::invalid_input(e.to_string()))?;
        let record: novadb_core::EntityRecord =
            serde_json::from_slice(&bytes).map_err(|e| NovaError::invalid_input(e.to_string()))?;
        let novadb_core::EntityRecord::Noun(mut noun) = record else {
            return Err(NovaError::invalid_input("version payload is not a noun"));
        };
        noun.updated_at = self.now_ms();

        let ctx = self.ensure_context(branch).await?;
        if let Some((_, previous)) = self.find_noun(branch, id).await? {
            ctx.metadata_index.remove(id, &previous.metadata);
        }
        ctx.entity_store.save_noun(&noun).await?;
        ctx.metadata_index.add(noun.id, &noun.metadata);
        if !noun.vector.is_empty() {
            ctx.hnsw.for_type(noun.noun_type).insert(noun.id, &noun.vector).await;
        }
        Ok(())
    }

    async fn version_list_impl(
        &self,
        branch: &str,
        id: EntityId,
        tag_glob: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<novadb_core::VersionRecord>> {
        self.versions.list(branch, id, tag_glob.as_deref(), limit).await
    }

    async fn version_compare_impl(&self, branch: &str, id: EntityId, a: u64, b: u64) -> Result<Diff> {
        self.versions.compare(branch, id, a, b).await
    }

    async fn version_prune_impl(&self, branch: &str, id: EntityId, opts: PruneOptions) -> Result<usize> {
        self.ensure_writable()?;
        self.versions.prune(branch, id, opts).await
    }

    async fn get_version_impl(&self, branch: &str, id: EntityId, version: u64) -> Result<Option<novadb_core::VersionRecord>> {
        self.versions.get_version(branch, id, version).await
    }

    async fn get_version_by_tag_impl(&self, branch: &str, id: EntityId, tag: String) -> Result<Option<novadb_core::VersionRecord>> {
        self.versions.get_version_by_tag(branch, id, &tag).await
    }

    async fn get_version_count_impl(&self, branch: &str, id: EntityId) -> Result<usize> {
        self.versions.get_version_count(branch, id).await
    }

    // ---- statistics ----

    async fn get_statistics_impl(&self, branch: &str) -> Result<Statistics> {
        let ctx = self.ensure_context(branch).await?;
        let mut noun_count = 0;
        for &noun_type in NounType::ALL {
            noun_count += ctx.entity_store.list_nouns_by_type(noun_type).await?.len();
        }
        let verb_count = ctx.graph_index.all_verb_ids().len();
        let branch_count = self.branches.list_branches().await?.len().max(1);
        let object_count = self.count_objects(branch).await?;
        Ok(Statistics {
            noun_count,
            verb_count,
            branch_count,
            dimension: *self.dimension.read().unwrap(),
            current_branch: branch.to_string(),
            storage: StorageFootprint { kind: self.config.storage.kind, object_count },
            cache_hit_rate: self.cache.hit_rate(),
            throttling: self.backpressure.current_band(),
        })
    }
}

/// The engine facade (spec.md §6). Cheap to clone-by-reference: `fork` and
/// `checkout` return/mutate a handle whose VCS managers, storage and
/// collaborators are shared (`Arc<EngineInner>`) with every other handle
/// over the same store, while `current_branch` is private to each handle so
/// multiple forked handles can be live at once without fighting over "the"
/// current branch.
pub struct Engine<S: ObjectStore + 'static> {
    inner: Arc<EngineInner<S>>,
    current_branch: RwLock<String>,
}

impl<S: ObjectStore + 'static> Engine<S> {
    /// `init` (spec.md §6): builds the VCS managers and the root branch's
    /// context over `store`. `embedding` stands in for the `provideEmbedding`
    /// collaborator; `hooks` for `provideAugmentation`/`provideStorage`.
    pub async fn init(store: Arc<S>, config: EngineConfig, embedding: Arc<dyn EmbeddingProvider>, hooks: HookChain) -> Result<Self> {
        let cache = Arc::new(WriteThroughCache::new(store.clone()));
        let branches = Arc::new(BranchManager::new(store.clone()));
        let commits = Arc::new(CommitManager::new(store.clone(), branches.clone()));
        let versions = Arc::new(VersionManager::new(store.clone()));
        let backpressure =
            Arc::new(Backpressure::new(config.write.total_capacity).with_thresholds(config.write.band_thresholds()));
        let hnsw_params: HnswParams = config.hnsw.into();
        let retry_policy = RetryPolicy { max_retries: config.write.max_retries };
        let dimension = RwLock::new(config.dimension);

        let inner = Arc::new(EngineInner {
            config,
            store,
            cache,
            branches,
            commits,
            versions,
            embedding,
            hooks: Arc::new(hooks),
            backpressure,
            retry_policy,
            hnsw_params,
            dimension,
            mode: RwLock::new(OperatingMode::Normal),
            contexts: DashMap::new(),
        });
        inner.ensure_context(ROOT_BRANCH).await?;
        Ok(Self { inner, current_branch: RwLock::new(ROOT_BRANCH.to_string()) })
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        *self.inner.mode.write().unwrap() = mode;
    }

    pub fn mode(&self) -> OperatingMode {
        *self.inner.mode.read().unwrap()
    }

    pub fn current_branch_name(&self) -> String {
        self.current_branch.read().unwrap().clone()
    }

    async fn current_context(&self) -> Result<Arc<BranchContext<S>>> {
        self.inner.ensure_context(&self.current_branch_name()).await
    }

    fn cache_handle(&self) -> Arc<WriteThroughCache<S>> {
        self.inner.cache.clone()
    }

    // ---- entities (spec.md §6 "add"/"get"/"update"/"delete") ----

    pub async fn add(&self, req: AddRequest) -> Result<EntityId> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&req);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let req: AddRequest = from_envelope(p)?;
                let id = inner.add_impl(&branch, req).await?;
                Ok(to_envelope(&id))
            })
        };
        let result = self.inner.hooks.run("add", params, terminal).await?;
        from_envelope(result)
    }

    /// Adds each request in turn through the (already hooked) `add`, rather
    /// than wrapping the whole batch in its own hook invocation, so per-entity
    /// augmentation still runs once per entity.
    pub async fn add_many(&self, reqs: Vec<AddRequest>) -> Result<Vec<Result<EntityId>>> {
        self.inner.ensure_writable()?;
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            out.push(self.add(req).await);
        }
        Ok(out)
    }

    pub async fn get(&self, id: EntityId, include_vectors: bool) -> Result<Option<novadb_core::Noun>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, include_vectors));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, include_vectors): (EntityId, bool) = from_envelope(p)?;
                let noun = inner.get_impl(&branch, id, include_vectors).await?;
                Ok(to_envelope(&noun))
            })
        };
        let result = self.inner.hooks.run("get", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn has(&self, id: EntityId) -> Result<bool> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&id);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let id: EntityId = from_envelope(p)?;
                let found = inner.has_impl(&branch, id).await?;
                Ok(to_envelope(&found))
            })
        };
        let result = self.inner.hooks.run("has", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn get_metadata(&self, id: EntityId) -> Result<Option<Value>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&id);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let id: EntityId = from_envelope(p)?;
                let metadata = inner.get_metadata_impl(&branch, id).await?;
                Ok(to_envelope(&metadata))
            })
        };
        let result = self.inner.hooks.run("getMetadata", params, terminal).await?;
        from_envelope(result)
    }

    /// Point-reads each id through the (already hooked) `get`.
    pub async fn get_batch(&self, ids: &[EntityId], include_vectors: bool) -> Result<Vec<Option<novadb_core::Noun>>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(self.get(id, include_vectors).await?);
        }
        Ok(out)
    }

    pub async fn update(&self, id: EntityId, req: UpdateRequest) -> Result<()> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, req));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, req): (EntityId, UpdateRequest) = from_envelope(p)?;
                inner.update_impl(&branch, id, req).await?;
                Ok(Value::Null)
            })
        };
        self.inner.hooks.run("update", params, terminal).await?;
        Ok(())
    }

    pub async fn delete(&self, id: EntityId) -> Result<()> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&id);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let id: EntityId = from_envelope(p)?;
                inner.delete_impl(&branch, id).await?;
                Ok(Value::Null)
            })
        };
        self.inner.hooks.run("delete", params, terminal).await?;
        Ok(())
    }

    // ---- relations (spec.md §6 "relate"/"unrelate"/"getRelations") ----

    pub async fn relate(&self, req: RelateRequest) -> Result<EntityId> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&req);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let req: RelateRequest = from_envelope(p)?;
                let id = inner.relate_impl(&branch, req).await?;
                Ok(to_envelope(&id))
            })
        };
        let result = self.inner.hooks.run("relate", params, terminal).await?;
        from_envelope(result)
    }

    /// Point read of a single verb by id. Cheap enough to stay on the
    /// write-only mode's read allowlist alongside `get`/`has`/`get_metadata`/
    /// `get_batch`, unlike the heavier fused `find`.
    pub async fn get_verb(&self, verb_id: EntityId) -> Result<Option<Verb>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&verb_id);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let verb_id: EntityId = from_envelope(p)?;
                let verb = inner.get_verb_impl(&branch, verb_id).await?;
                Ok(to_envelope(&verb))
            })
        };
        let result = self.inner.hooks.run("getVerb", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn unrelate(&self, verb_id: EntityId) -> Result<()> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&verb_id);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let verb_id: EntityId = from_envelope(p)?;
                inner.unrelate_impl(&branch, verb_id).await?;
                Ok(Value::Null)
            })
        };
        self.inner.hooks.run("unrelate", params, terminal).await?;
        Ok(())
    }

    pub async fn get_relations(&self, query: RelationsQuery) -> Result<Vec<Verb>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&query);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let query: RelationsQuery = from_envelope(p)?;
                let verbs = inner.get_relations_impl(&branch, query).await?;
                Ok(to_envelope(&verbs))
            })
        };
        let result = self.inner.hooks.run("getRelations", params, terminal).await?;
        from_envelope(result)
    }

    // ---- querying (spec.md §6 "find") ----

    pub async fn find(&self, query: Query, like: Option<EmbedInput>) -> Result<Vec<ScoredEntity>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(query, like));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (query, like): (Query, Option<EmbedInput>) = from_envelope(p)?;
                let hits = inner.find_impl(&branch, query, like).await?;
                Ok(to_envelope(&hits))
            })
        };
        let result = self.inner.hooks.run("find", params, terminal).await?;
        from_envelope(result)
    }

    /// Convenience builder for the common `{connected: {from, verbType, depth}}`
    /// shape, since `ConnectedSpec`/`Query` live in `novadb-query` and callers
    /// of the facade shouldn't need to import that crate just for this.
    pub fn connected_query(from: Option<EntityId>, to: Option<EntityId>, verb_type: Option<VerbType>, depth: usize) -> ConnectedSpec {
        ConnectedSpec { from, to, verb_type, depth: depth.max(1) }
    }

    pub fn where_query(filter: Filter) -> Query {
        Query::new().with_where(filter)
    }

    // ---- branching (spec.md §6 "fork"/"checkout"/"listBranches"/"deleteBranch") ----

    /// Forks the current branch into `name` (or an auto-generated name) and
    /// returns a new handle scoped to it. The returned `Engine` shares the
    /// same `Arc<EngineInner>` as `self`; only `current_branch` differs. Not
    /// routed through hooks: the result is a new session handle, not a
    /// `Value` an augmentation could sensibly transform.
    pub async fn fork(&self, name: Option<String>) -> Result<Self> {
        self.inner.ensure_writable()?;
        let parent_branch = self.current_branch_name();
        let child_name = name.unwrap_or_else(|| format!("{parent_branch}-fork-{}", EntityId::new()));
        self.inner.branches.fork(&child_name, Some(&parent_branch)).await?;

        let parent_ctx = self.current_context().await?;
        let child_ctx = Arc::new(parent_ctx.fork(self.cache_handle(), self.inner.store.clone(), child_name.clone(), parent_branch));
        self.inner.contexts.insert(child_name.clone(), child_ctx);

        Ok(Self { inner: self.inner.clone(), current_branch: RwLock::new(child_name) })
    }

    pub async fn checkout(&self, name: &str) -> Result<()> {
        if self.inner.branches.read_ref(name).await?.is_none() && name != ROOT_BRANCH {
            return Err(NovaError::not_found(format!("branch not found: {name}")));
        }
        self.inner.ensure_context(name).await?;
        *self.current_branch.write().unwrap() = name.to_string();
        Ok(())
    }

    pub async fn list_branches(&self) -> Result<Vec<String>> {
        let inner = self.inner.clone();
        let terminal = move |_: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            Box::pin(async move {
                let branches = inner.list_branches_impl().await?;
                Ok(to_envelope(&branches))
            })
        };
        let result = self.inner.hooks.run("listBranches", Value::Null, terminal).await?;
        from_envelope(result)
    }

    pub async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let inner = self.inner.clone();
        let params = to_envelope(&(name.to_string(), force));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            Box::pin(async move {
                let (name, force): (String, bool) = from_envelope(p)?;
                inner.delete_branch_impl(&name, force).await?;
                Ok(Value::Null)
            })
        };
        self.inner.hooks.run("deleteBranch", params, terminal).await?;
        Ok(())
    }

    pub fn get_current_branch(&self) -> String {
        self.current_branch_name()
    }

    // ---- commits (spec.md §6 "commit"/"getHistory") ----

    pub async fn commit(&self, message: impl Into<String>, author: Signature) -> Result<ObjectId> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(message.into(), author));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (message, author): (String, Signature) = from_envelope(p)?;
                let hash = inner.commit_impl(&branch, message, author).await?;
                Ok(to_envelope(&hash))
            })
        };
        let result = self.inner.hooks.run("commit", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn get_history(&self, limit: Option<usize>) -> Result<Vec<novadb_core::Commit>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&limit);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let limit: Option<usize> = from_envelope(p)?;
                let history = inner.get_history_impl(&branch, limit).await?;
                Ok(to_envelope(&history))
            })
        };
        let result = self.inner.hooks.run("getHistory", params, terminal).await?;
        from_envelope(result)
    }

    // ---- versioning (spec.md §6 "version.*") ----

    pub async fn version_save(&self, id: EntityId, opts: SaveOptions) -> Result<novadb_core::VersionRecord> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, opts));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, opts): (EntityId, SaveOptions) = from_envelope(p)?;
                let record = inner.version_save_impl(&branch, id, opts).await?;
                Ok(to_envelope(&record))
            })
        };
        let result = self.inner.hooks.run("versionSave", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn version_restore(&self, id: EntityId, version: u64) -> Result<()> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, version));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, version): (EntityId, u64) = from_envelope(p)?;
                inner.version_restore_impl(&branch, id, version).await?;
                Ok(Value::Null)
            })
        };
        self.inner.hooks.run("versionRestore", params, terminal).await?;
        Ok(())
    }

    pub async fn version_list(&self, id: EntityId, tag_glob: Option<&str>, limit: Option<usize>) -> Result<Vec<novadb_core::VersionRecord>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, tag_glob.map(String::from), limit));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, tag_glob, limit): (EntityId, Option<String>, Option<usize>) = from_envelope(p)?;
                let versions = inner.version_list_impl(&branch, id, tag_glob, limit).await?;
                Ok(to_envelope(&versions))
            })
        };
        let result = self.inner.hooks.run("versionList", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn version_compare(&self, id: EntityId, a: u64, b: u64) -> Result<Diff> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, a, b));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, a, b): (EntityId, u64, u64) = from_envelope(p)?;
                let diff = inner.version_compare_impl(&branch, id, a, b).await?;
                Ok(to_envelope(&diff))
            })
        };
        let result = self.inner.hooks.run("versionCompare", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn version_prune(&self, id: EntityId, opts: PruneOptions) -> Result<usize> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, opts));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, opts): (EntityId, PruneOptions) = from_envelope(p)?;
                let pruned = inner.version_prune_impl(&branch, id, opts).await?;
                Ok(to_envelope(&pruned))
            })
        };
        let result = self.inner.hooks.run("versionPrune", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn get_version(&self, id: EntityId, version: u64) -> Result<Option<novadb_core::VersionRecord>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, version));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, version): (EntityId, u64) = from_envelope(p)?;
                let record = inner.get_version_impl(&branch, id, version).await?;
                Ok(to_envelope(&record))
            })
        };
        let result = self.inner.hooks.run("getVersion", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn get_version_by_tag(&self, id: EntityId, tag: &str) -> Result<Option<novadb_core::VersionRecord>> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&(id, tag.to_string()));
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let (id, tag): (EntityId, String) = from_envelope(p)?;
                let record = inner.get_version_by_tag_impl(&branch, id, tag).await?;
                Ok(to_envelope(&record))
            })
        };
        let result = self.inner.hooks.run("getVersionByTag", params, terminal).await?;
        from_envelope(result)
    }

    pub async fn get_version_count(&self, id: EntityId) -> Result<usize> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let params = to_envelope(&id);
        let terminal = move |p: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let id: EntityId = from_envelope(p)?;
                let count = inner.get_version_count_impl(&branch, id).await?;
                Ok(to_envelope(&count))
            })
        };
        let result = self.inner.hooks.run("getVersionCount", params, terminal).await?;
        from_envelope(result)
    }

    // ---- statistics ----

    pub async fn get_statistics(&self) -> Result<Statistics> {
        let branch = self.current_branch_name();
        let inner = self.inner.clone();
        let terminal = move |_: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            let branch = branch.clone();
            Box::pin(async move {
                let stats = inner.get_statistics_impl(&branch).await?;
                Ok(to_envelope(&stats))
            })
        };
        let result = self.inner.hooks.run("getStatistics", Value::Null, terminal).await?;
        from_envelope(result)
    }
}
