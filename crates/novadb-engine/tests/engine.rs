//! End-to-end engine tests against an in-memory store: exercise the full
//! add/get/update/delete, relate/getRelations, find-fusion, branching,
//! commit/history and versioning surface together rather than per-crate in
//! isolation.

use novadb_core::{NounType, Result, Signature, Value, VerbType};
use novadb_engine::{
    AddRequest, AugmentationHook, EmbedInput, Engine, EngineConfig, HashEmbeddingProvider, HookChain, NextFn,
    OperatingMode, RelateRequest, RelationsQuery, UpdateRequest,
};
use novadb_index::Filter;
use novadb_storage_memory::MemoryStore;
use novadb_vcs::{PruneOptions, SaveOptions};
use novadb_write::Band;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn engine() -> Engine<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let embedding = Arc::new(HashEmbeddingProvider::new(8));
    Engine::init(store, EngineConfig::default(), embedding, HookChain::new()).await.unwrap()
}

fn obj(pairs: &[(&str, Value)]) -> Value {
    Value::Obj(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

fn signature() -> Signature {
    Signature { name: "tester".into(), email: "tester@example.com".into(), timestamp_ms: 0 }
}

#[tokio::test]
async fn add_then_get_roundtrips_metadata_and_vector() {
    let eng = engine().await;
    let id = eng
        .add(AddRequest {
            noun_type: NounType::Person,
            data: EmbedInput::Text("alice".to_string()),
            metadata: Some(obj(&[("name", Value::Str("alice".into()))])),
            service: None,
            id: None,
        })
        .await
        .unwrap();

    let noun = eng.get(id, true).await.unwrap().unwrap();
    assert_eq!(noun.metadata, obj(&[("name", Value::Str("alice".into()))]));
    assert_eq!(noun.vector.len(), 8);

    let without_vector = eng.get(id, false).await.unwrap().unwrap();
    assert!(without_vector.vector.is_empty());
    assert!(eng.has(id).await.unwrap());
}

#[tokio::test]
async fn update_reindexes_metadata_so_old_filter_stops_matching() {
    let eng = engine().await;
    let id = eng
        .add(AddRequest {
            noun_type: NounType::Person,
            data: EmbedInput::Text("bob".to_string()),
            metadata: Some(obj(&[("status", Value::Str("draft".into()))])),
            service: None,
            id: None,
        })
        .await
        .unwrap();

    let draft_query = Engine::<MemoryStore>::where_query(Filter::Eq {
        field: "status".to_string(),
        value: Value::Str("draft".into()),
    })
    .with_type(NounType::Person);
    let found = eng.find(draft_query, None).await.unwrap();
    assert_eq!(found.len(), 1);

    eng.update(id, UpdateRequest { data: None, metadata: Some(obj(&[("status", Value::Str("final".into()))])) })
        .await
        .unwrap();

    let draft_query = Engine::<MemoryStore>::where_query(Filter::Eq {
        field: "status".to_string(),
        value: Value::Str("draft".into()),
    })
    .with_type(NounType::Person);
    assert!(eng.find(draft_query, None).await.unwrap().is_empty());

    let final_query = Engine::<MemoryStore>::where_query(Filter::Eq {
        field: "status".to_string(),
        value: Value::Str("final".into()),
    })
    .with_type(NounType::Person);
    assert_eq!(eng.find(final_query, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_removes_entity_and_its_index_postings() {
    let eng = engine().await;
    let id = eng
        .add(AddRequest {
            noun_type: NounType::Document,
            data: EmbedInput::Text("doomed".to_string()),
            metadata: Some(obj(&[("kind", Value::Str("doomed".into()))])),
            service: None,
            id: None,
        })
        .await
        .unwrap();

    eng.delete(id).await.unwrap();
    assert!(eng.get(id, false).await.unwrap().is_none());
    assert!(!eng.has(id).await.unwrap());

    let query = Engine::<MemoryStore>::where_query(Filter::Eq {
        field: "kind".to_string(),
        value: Value::Str("doomed".into()),
    });
    assert!(eng.find(query, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn relate_unrelate_and_get_relations_round_trip() {
    let eng = engine().await;
    let alice = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Text("alice".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    let bob = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Text("bob".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();

    let verb_id = eng
        .relate(RelateRequest {
            from: alice,
            to: bob,
            verb_type: VerbType::Follows,
            weight: None,
            confidence: None,
            metadata: None,
            bidirectional: false,
        })
        .await
        .unwrap();

    let from_alice = eng.get_relations(RelationsQuery { from: Some(alice), to: None, verb_type: None }).await.unwrap();
    assert_eq!(from_alice.len(), 1);
    assert_eq!(from_alice[0].id, verb_id);

    let from_bob = eng.get_relations(RelationsQuery { from: Some(bob), to: None, verb_type: None }).await.unwrap();
    assert!(from_bob.is_empty());

    assert!(eng.get_verb(verb_id).await.unwrap().is_some());

    eng.unrelate(verb_id).await.unwrap();
    assert!(eng.get_relations(RelationsQuery { from: Some(alice), to: None, verb_type: None }).await.unwrap().is_empty());
    assert!(eng.get_verb(verb_id).await.unwrap().is_none());
}

#[tokio::test]
async fn bidirectional_relate_is_visible_from_either_endpoint() {
    let eng = engine().await;
    let a = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Text("a".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    let b = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Text("b".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();

    eng.relate(RelateRequest {
        from: a,
        to: b,
        verb_type: VerbType::RelatesTo,
        weight: None,
        confidence: None,
        metadata: None,
        bidirectional: true,
    })
    .await
    .unwrap();

    let from_a = eng.get_relations(RelationsQuery { from: Some(a), to: None, verb_type: None }).await.unwrap();
    let from_b = eng.get_relations(RelationsQuery { from: Some(b), to: None, verb_type: None }).await.unwrap();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_b.len(), 1);
    assert_eq!(from_a[0].id, from_b[0].id);

    let to_b = eng.get_relations(RelationsQuery { from: None, to: Some(b), verb_type: None }).await.unwrap();
    assert_eq!(to_b.len(), 1);
}

#[tokio::test]
async fn find_fuses_where_filter_with_similarity_ranking() {
    let eng = engine().await;
    for (text, tag) in [("red apple", "fruit"), ("red car", "vehicle"), ("green apple", "fruit")] {
        eng.add(AddRequest {
            noun_type: NounType::Document,
            data: EmbedInput::Text(text.to_string()),
            metadata: Some(obj(&[("tag", Value::Str(tag.into()))])),
            service: None,
            id: None,
        })
        .await
        .unwrap();
    }

    let query = Engine::<MemoryStore>::where_query(Filter::Eq { field: "tag".to_string(), value: Value::Str("fruit".into()) })
        .with_type(NounType::Document)
        .with_limit(10);
    let results = eng.find(query, Some(EmbedInput::Text("red apple".to_string()))).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.entity.metadata == obj(&[("tag", Value::Str("fruit".into()))])));
}

#[tokio::test]
async fn dimension_locks_after_first_vector_and_rejects_mismatch() {
    let eng = engine().await;
    eng.add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Vector(vec![1.0, 0.0, 0.0]), metadata: None, service: None, id: None })
        .await
        .unwrap();

    let mismatched = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Vector(vec![1.0, 0.0]), metadata: None, service: None, id: None })
        .await;
    assert!(mismatched.is_err());
}

#[tokio::test]
async fn fork_isolates_child_branch_writes_from_parent() {
    let eng = engine().await;
    let shared = eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("shared".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();

    let child = eng.fork(Some("feature".to_string())).await.unwrap();
    assert!(child.get(shared, false).await.unwrap().is_some());

    let only_in_child = child
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("child-only".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();

    assert!(eng.get(only_in_child, false).await.unwrap().is_none());
    assert_eq!(eng.get_current_branch(), "main");
    assert_eq!(child.get_current_branch(), "feature");
}

#[tokio::test]
async fn commit_advances_branch_history() {
    let eng = engine().await;
    eng.add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("v1".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    let first = eng.commit("first commit", signature()).await.unwrap();

    eng.add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("v2".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    let second = eng.commit("second commit", signature()).await.unwrap();
    assert_ne!(first, second);

    let history = eng.get_history(None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message, "second commit");
    assert_eq!(history[1].message, "first commit");
}

#[tokio::test]
async fn version_save_restore_round_trips_prior_metadata() {
    let eng = engine().await;
    let id = eng
        .add(AddRequest {
            noun_type: NounType::Document,
            data: EmbedInput::Text("original".into()),
            metadata: Some(obj(&[("title", Value::Str("v1".into()))])),
            service: None,
            id: None,
        })
        .await
        .unwrap();

    let v1 = eng.version_save(id, SaveOptions::default()).await.unwrap();
    assert_eq!(v1.version, 1);

    eng.update(id, UpdateRequest { data: None, metadata: Some(obj(&[("title", Value::Str("v2".into()))])) }).await.unwrap();
    let v2 = eng.version_save(id, SaveOptions::default()).await.unwrap();
    assert_eq!(v2.version, 2);

    let diff = eng.version_compare(id, 1, 2).await.unwrap();
    assert!(!diff.identical);
    assert!(diff.modified.iter().any(|c| c.path.contains("title")));

    eng.version_restore(id, 1).await.unwrap();
    let restored = eng.get(id, false).await.unwrap().unwrap();
    assert_eq!(restored.metadata, obj(&[("title", Value::Str("v1".into()))]));

    let pruned = eng.version_prune(id, PruneOptions { keep_recent: Some(1), keep_tagged: false, keep_after_ms: None }).await.unwrap();
    assert_eq!(pruned, 1);
    assert_eq!(eng.get_version_count(id).await.unwrap(), 1);
}

#[tokio::test]
async fn read_only_mode_blocks_writes_but_allows_point_reads() {
    let eng = engine().await;
    let id = eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("frozen".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();

    eng.set_mode(OperatingMode::ReadOnly);
    assert!(eng.get(id, false).await.unwrap().is_some());
    let blocked = eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("nope".into()), metadata: None, service: None, id: None })
        .await;
    assert!(blocked.is_err());
}

#[tokio::test]
async fn write_only_mode_blocks_find_but_allows_add_and_get() {
    let eng = engine().await;
    let id = eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("ok".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();

    let other = eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("peer".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    let verb_id = eng
        .relate(RelateRequest {
            from: id,
            to: other,
            verb_type: VerbType::References,
            weight: None,
            confidence: None,
            metadata: None,
            bidirectional: false,
        })
        .await
        .unwrap();

    eng.set_mode(OperatingMode::WriteOnly);
    assert!(eng.get(id, false).await.unwrap().is_some());
    assert!(eng.has(id).await.unwrap());
    assert!(eng.get_metadata(id).await.unwrap().is_some());
    assert!(eng.get_batch(&[id], false).await.unwrap()[0].is_some());
    assert!(eng.get_verb(verb_id).await.unwrap().is_some());
    let blocked = eng.find(novadb_query::Query::new(), None).await;
    assert!(blocked.is_err());
    assert!(eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("still ok".into()), metadata: None, service: None, id: None })
        .await
        .is_ok());
}

#[tokio::test]
async fn a_second_engine_over_the_same_store_rehydrates_prior_data() {
    let store = Arc::new(MemoryStore::new());
    let embedding: Arc<HashEmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(8));

    let first = Engine::init(store.clone(), EngineConfig::default(), embedding.clone(), HookChain::new()).await.unwrap();
    let id = first
        .add(AddRequest {
            noun_type: NounType::Document,
            data: EmbedInput::Text("persisted".into()),
            metadata: Some(obj(&[("tag", Value::Str("persisted".into()))])),
            service: None,
            id: None,
        })
        .await
        .unwrap();
    first.commit("seed", signature()).await.unwrap();

    let second = Engine::init(store, EngineConfig::default(), embedding, HookChain::new()).await.unwrap();
    assert!(second.get(id, false).await.unwrap().is_some());
    let query =
        Engine::<MemoryStore>::where_query(Filter::Eq { field: "tag".to_string(), value: Value::Str("persisted".into()) });
    assert_eq!(second.find(query, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn get_statistics_reports_counts_cache_and_throttling() {
    let eng = engine().await;
    let alice = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Text("alice".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    let bob = eng
        .add(AddRequest { noun_type: NounType::Person, data: EmbedInput::Text("bob".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    eng.relate(RelateRequest {
        from: alice,
        to: bob,
        verb_type: VerbType::Follows,
        weight: None,
        confidence: None,
        metadata: None,
        bidirectional: false,
    })
    .await
    .unwrap();

    // Re-read an entity so the cache has at least one witness hit.
    eng.get(bob, false).await.unwrap();
    eng.get(bob, false).await.unwrap();

    let stats = eng.get_statistics().await.unwrap();
    assert_eq!(stats.noun_count, 2);
    assert_eq!(stats.verb_count, 1);
    assert_eq!(stats.current_branch, "main");
    assert!(stats.storage.object_count > 0);
    assert!((0.0..=1.0).contains(&stats.cache_hit_rate));
    assert_eq!(stats.throttling, Band::Low);
}

#[tokio::test]
async fn registered_hook_intercepts_add_and_sees_its_params() {
    struct RecordingHook {
        seen_ops: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl AugmentationHook for RecordingHook {
        fn name(&self) -> &str {
            "recording"
        }
        async fn handle(&self, op: &str, params: Value, next: NextFn) -> Result<Value> {
            self.seen_ops.lock().unwrap().push(op.to_string());
            next(params).await
        }
    }

    struct CountingGetHook {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl AugmentationHook for CountingGetHook {
        fn name(&self) -> &str {
            "counting-get"
        }
        async fn handle(&self, op: &str, params: Value, next: NextFn) -> Result<Value> {
            if op == "get" {
                self.calls.fetch_add(1, Ordering::SeqCst);
            }
            next(params).await
        }
    }

    let seen_ops = Arc::new(std::sync::Mutex::new(Vec::new()));
    let get_calls = Arc::new(AtomicUsize::new(0));

    let mut hooks = HookChain::new();
    hooks.register(Arc::new(RecordingHook { seen_ops: seen_ops.clone() }));
    hooks.register(Arc::new(CountingGetHook { calls: get_calls.clone() }));

    let store = Arc::new(MemoryStore::new());
    let embedding = Arc::new(HashEmbeddingProvider::new(8));
    let eng = Engine::init(store, EngineConfig::default(), embedding, hooks).await.unwrap();

    let id = eng
        .add(AddRequest { noun_type: NounType::Document, data: EmbedInput::Text("hooked".into()), metadata: None, service: None, id: None })
        .await
        .unwrap();
    eng.get(id, false).await.unwrap();
    eng.get(id, false).await.unwrap();

    assert_eq!(get_calls.load(Ordering::SeqCst), 2);
    let ops = seen_ops.lock().unwrap();
    assert!(ops.contains(&"add".to_string()));
    assert_eq!(ops.iter().filter(|o| o.as_str() == "get").count(), 2);
}
