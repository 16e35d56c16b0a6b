//! Per-entity versioning on top of commits (spec.md §4.9): `save` dedups on
//! unchanged content hash, `restore`/`list`/`compare`/`prune` operate on the
//! resulting version chain.

use crate::diff::{diff, Diff, DiffOptions};
use novadb_core::{EntityId, NovaError, ObjectId, Result, Value, VersionRecord};
use novadb_storage::ObjectStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn version_key(branch: &str, entity_id: EntityId, version: u64) -> String {
    format!("branches/{branch}/versions/{entity_id}/{version}.json")
}

fn latest_key(branch: &str, entity_id: EntityId) -> String {
    format!("branches/{branch}/versions/{entity_id}/latest.json")
}

fn payload_key(branch: &str, entity_id: EntityId, version: u64) -> String {
    format!("branches/{branch}/versions/{entity_id}/{version}.payload.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveOptions {
    pub tag: Option<String>,
    pub description: Option<String>,
    pub commit_hash: Option<ObjectId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneOptions {
    pub keep_recent: Option<usize>,
    pub keep_tagged: bool,
    pub keep_after_ms: Option<i64>,
}

pub struct VersionManager<S: ObjectStore> {
    store: Arc<S>,
}

impl<S: ObjectStore + 'static> VersionManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn read_latest(&self, branch: &str, entity_id: EntityId) -> Result<Option<VersionRecord>> {
        let bytes = self.store.get(&latest_key(branch, entity_id)).await?;
        Ok(bytes.map(|b| serde_json::from_slice(&b).expect("stored version record is valid")))
    }

    /// Reads the current entity payload, hashes it, and either returns the
    /// existing version unchanged (dedup) or writes a new one.
    pub async fn save(
        &self,
        branch: &str,
        entity_id: EntityId,
        payload: &Value,
        opts: SaveOptions,
    ) -> Result<VersionRecord> {
        let content_hash = payload.canonical_hash();
        if let Some(prev) = self.read_latest(branch, entity_id).await? {
            if prev.content_hash == content_hash {
                return Ok(prev);
            }
        }

        let prev_version = self.read_latest(branch, entity_id).await?.map(|v| v.version).unwrap_or(0);
        let record = VersionRecord {
            entity_id,
            version: prev_version + 1,
            branch: branch.to_string(),
            tag: opts.tag,
            description: opts.description,
            content_hash,
            commit_hash: opts.commit_hash,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        let record_bytes = serde_json::to_vec(&record).expect("version record serializes");
        self.store.put(&version_key(branch, entity_id, record.version), record_bytes.clone().into()).await?;
        self.store.put(&latest_key(branch, entity_id), record_bytes.into()).await?;
        let payload_bytes = serde_json::to_vec(payload).expect("payload serializes");
        self.store.put(&payload_key(branch, entity_id, record.version), payload_bytes.into()).await?;

        Ok(record)
    }

    pub async fn get_version(&self, branch: &str, entity_id: EntityId, version: u64) -> Result<Option<VersionRecord>> {
        let bytes = self.store.get(&version_key(branch, entity_id, version)).await?;
        Ok(bytes.map(|b| serde_json::from_slice(&b).expect("stored version record is valid")))
    }

    /// The raw snapshot stored alongside a version record; `restore` in
    /// `novadb-engine` deserializes this back into a live entity.
    pub async fn get_payload(&self, branch: &str, entity_id: EntityId, version: u64) -> Result<Value> {
        self.store
            .get(&payload_key(branch, entity_id, version))
            .await?
            .map(|b| serde_json::from_slice(&b).expect("stored version payload is valid"))
            .ok_or_else(|| NovaError::not_found(format!("version payload missing: {entity_id}@{version}")))
    }

    pub async fn get_version_by_tag(&self, branch: &str, entity_id: EntityId, tag: &str) -> Result<Option<VersionRecord>> {
        let all = self.list(branch, entity_id, None, None).await?;
        Ok(all.into_iter().find(|v| v.tag.as_deref() == Some(tag)))
    }

    pub async fn get_version_count(&self, branch: &str, entity_id: EntityId) -> Result<usize> {
        Ok(self.list(branch, entity_id, None, None).await?.len())
    }

    /// Newest-first, with an optional `*`-glob filter on `tag`.
    pub async fn list(
        &self,
        branch: &str,
        entity_id: EntityId,
        tag_glob: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<VersionRecord>> {
        let prefix = format!("branches/{branch}/versions/{entity_id}/");
        let page = self.store.list(&prefix, None, 10_000).await?;
        let mut records = Vec::new();
        for key in &page.keys {
            let Some(file_name) = key.rsplit('/').next() else { continue };
            if file_name == "latest.json" || !file_name.ends_with(".json") || file_name.contains(".payload.") {
                continue;
            }
            if let Some(bytes) = self.store.get(key).await? {
                records.push(serde_json::from_slice::<VersionRecord>(&bytes).expect("stored version record is valid"));
            }
        }
        records.sort_by(|a, b| b.version.cmp(&a.version));

        if let Some(glob) = tag_glob {
            let re = glob_to_regex(glob);
            records.retain(|r| r.tag.as_deref().map(|t| re.is_match(t)).unwrap_or(false));
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    pub async fn compare(&self, branch: &str, entity_id: EntityId, a: u64, b: u64) -> Result<Diff> {
        let from = self.get_payload(branch, entity_id, a).await?;
        let to = self.get_payload(branch, entity_id, b).await?;
        Ok(diff(&from, &to, &DiffOptions::default()))
    }

    pub async fn prune(&self, branch: &str, entity_id: EntityId, opts: PruneOptions) -> Result<usize> {
        let mut all = self.list(branch, entity_id, None, None).await?;
        all.sort_by(|a, b| b.version.cmp(&a.version));

        let mut keep = vec![false; all.len()];
        if let Some(keep_recent) = opts.keep_recent {
            for flag in keep.iter_mut().take(keep_recent) {
                *flag = true;
            }
        }
        for (i, record) in all.iter().enumerate() {
            if opts.keep_tagged && record.tag.is_some() {
                keep[i] = true;
            }
            if let Some(after) = opts.keep_after_ms {
                if record.timestamp_ms >= after {
                    keep[i] = true;
                }
            }
        }

        let mut pruned = 0;
        for (record, keep) in all.iter().zip(keep.iter()) {
            if *keep {
                continue;
            }
            self.store.delete(&version_key(branch, entity_id, record.version)).await?;
            self.store.delete(&payload_key(branch, entity_id, record.version)).await?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

const REGEX_METACHARS: &str = ".+()|[]{}^$\\";

fn glob_to_regex(glob: &str) -> Regex {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        if ch == '*' {
            pattern.push_str(".*");
        } else if REGEX_METACHARS.contains(ch) {
            pattern.push('\\');
            pattern.push(ch);
        } else {
            pattern.push(ch);
        }
    }
    pattern.push('$');
    Regex::new(&pattern).expect("glob-derived pattern is valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use novadb_storage_memory::MemoryStore;
    use std::collections::BTreeMap;

    fn payload(n: f64) -> Value {
        let mut m = BTreeMap::new();
        m.insert("n".to_string(), Value::Num(n));
        Value::Obj(m)
    }

    #[tokio::test]
    async fn save_dedups_on_identical_content_hash() {
        let store = Arc::new(MemoryStore::new());
        let mgr = VersionManager::new(store);
        let id = EntityId::new();
        let v1 = mgr.save("main", id, &payload(1.0), SaveOptions::default()).await.unwrap();
        let v1_again = mgr.save("main", id, &payload(1.0), SaveOptions::default()).await.unwrap();
        assert_eq!(v1.version, v1_again.version);
        assert_eq!(mgr.get_version_count("main", id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_bumps_version_on_change() {
        let store = Arc::new(MemoryStore::new());
        let mgr = VersionManager::new(store);
        let id = EntityId::new();
        mgr.save("main", id, &payload(1.0), SaveOptions::default()).await.unwrap();
        let v2 = mgr.save("main", id, &payload(2.0), SaveOptions::default()).await.unwrap();
        assert_eq!(v2.version, 2);
    }

    #[tokio::test]
    async fn compare_reports_diff_between_versions() {
        let store = Arc::new(MemoryStore::new());
        let mgr = VersionManager::new(store);
        let id = EntityId::new();
        mgr.save("main", id, &payload(1.0), SaveOptions::default()).await.unwrap();
        mgr.save("main", id, &payload(2.0), SaveOptions::default()).await.unwrap();
        let d = mgr.compare("main", id, 1, 2).await.unwrap();
        assert_eq!(d.modified.len(), 1);
    }

    #[tokio::test]
    async fn prune_keeps_recent_and_tagged() {
        let store = Arc::new(MemoryStore::new());
        let mgr = VersionManager::new(store);
        let id = EntityId::new();
        mgr.save("main", id, &payload(1.0), SaveOptions::default()).await.unwrap();
        mgr.save(
            "main",
            id,
            &payload(2.0),
            SaveOptions { tag: Some("release".into()), ..Default::default() },
        )
        .await
        .unwrap();
        mgr.save("main", id, &payload(3.0), SaveOptions::default()).await.unwrap();

        let pruned = mgr
            .prune("main", id, PruneOptions { keep_recent: Some(1), keep_tagged: true, keep_after_ms: None })
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(mgr.get_version_count("main", id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn get_version_by_tag_finds_tagged_version() {
        let store = Arc::new(MemoryStore::new());
        let mgr = VersionManager::new(store);
        let id = EntityId::new();
        mgr.save("main", id, &payload(1.0), SaveOptions::default()).await.unwrap();
        mgr.save(
            "main",
            id,
            &payload(2.0),
            SaveOptions { tag: Some("v1.0".into()), ..Default::default() },
        )
        .await
        .unwrap();
        let found = mgr.get_version_by_tag("main", id, "v1.0").await.unwrap();
        assert_eq!(found.unwrap().version, 2);
    }
}
