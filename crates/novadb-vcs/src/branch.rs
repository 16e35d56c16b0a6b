//! Branches as named refs, with the per-branch mutex (C11, spec.md §5)
//! that serializes ref updates during `commit`/`deleteBranch`/`fork`.

use dashmap::DashMap;
use novadb_core::{NovaError, Ref, RefKind, Result};
use novadb_storage::ObjectStore;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

const DEFAULT_BRANCH: &str = "main";

fn ref_key(name: &str) -> String {
    format!("refs/heads/{name}.json")
}

pub struct BranchManager<S: ObjectStore> {
    store: Arc<S>,
    ref_locks: DashMap<String, Arc<Mutex<()>>>,
    current: RwLock<String>,
}

impl<S: ObjectStore + 'static> BranchManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ref_locks: DashMap::new(),
            current: RwLock::new(DEFAULT_BRANCH.to_string()),
        }
    }

    pub fn branch_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.ref_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn current_branch(&self) -> String {
        self.current.read().unwrap().clone()
    }

    pub async fn checkout(&self, name: &str) -> Result<()> {
        if self.read_ref(name).await?.is_none() {
            return Err(NovaError::not_found(format!("branch not found: {name}")));
        }
        *self.current.write().unwrap() = name.to_string();
        Ok(())
    }

    pub async fn read_ref(&self, name: &str) -> Result<Option<Ref>> {
        let bytes = self.store.get(&ref_key(name)).await?;
        Ok(bytes.map(|b| serde_json::from_slice(&b).expect("stored ref is valid")))
    }

    async fn write_ref(&self, r: &Ref) -> Result<()> {
        let bytes = serde_json::to_vec(r).expect("ref serializes");
        self.store.put(&ref_key(&r.name), bytes.into()).await
    }

    /// Creates `child_name` pointing at `from_branch`'s (default: current)
    /// head commit. COW inheritance on C4/C6/C9 is the caller's
    /// responsibility (spec.md §4.9 fork steps 3-4 span layers this crate
    /// doesn't own); this only creates the ref.
    pub async fn fork(&self, child_name: &str, from_branch: Option<&str>) -> Result<Ref> {
        let source = from_branch.map(str::to_string).unwrap_or_else(|| self.current_branch());
        let lock = self.branch_lock(child_name);
        let _guard = lock.lock().await;

        if self.read_ref(child_name).await?.is_some() {
            return Err(NovaError::conflict(format!("branch already exists: {child_name}")));
        }
        let parent_ref = self.read_ref(&source).await?;
        let commit_hash = parent_ref.map(|r| r.commit_hash);

        let child_ref = Ref {
            name: child_name.to_string(),
            commit_hash: commit_hash.unwrap_or_else(|| novadb_core::ObjectId::from_canonical_bytes(b"")),
            kind: RefKind::Branch,
        };
        self.write_ref(&child_ref).await?;
        Ok(child_ref)
    }

    pub async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        if !force && name == self.current_branch() {
            return Err(NovaError::invalid_input("cannot delete the current branch without force"));
        }
        let lock = self.branch_lock(name);
        let _guard = lock.lock().await;
        self.store.delete(&ref_key(name)).await
    }

    pub async fn list_branches(&self) -> Result<Vec<String>> {
        let page = self.store.list("refs/heads/", None, 10_000).await?;
        Ok(page
            .keys
            .iter()
            .filter_map(|k| k.rsplit('/').next())
            .filter_map(|f| f.strip_suffix(".json"))
            .map(str::to_string)
            .collect())
    }

    /// Advances `name`'s ref to `commit_hash` under its per-branch mutex.
    pub async fn advance_ref(&self, name: &str, commit_hash: novadb_core::ObjectId) -> Result<()> {
        let lock = self.branch_lock(name);
        let _guard = lock.lock().await;
        self.write_ref(&Ref {
            name: name.to_string(),
            commit_hash,
            kind: RefKind::Branch,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novadb_storage_memory::MemoryStore;

    #[tokio::test]
    async fn fork_creates_ref_pointing_at_parent_head() {
        let store = Arc::new(MemoryStore::new());
        let mgr = BranchManager::new(store);
        mgr.advance_ref("main", novadb_core::ObjectId::from_canonical_bytes(b"c1")).await.unwrap();
        let child = mgr.fork("feature", None).await.unwrap();
        assert_eq!(child.commit_hash, novadb_core::ObjectId::from_canonical_bytes(b"c1"));
    }

    #[tokio::test]
    async fn delete_current_branch_requires_force() {
        let store = Arc::new(MemoryStore::new());
        let mgr = BranchManager::new(store);
        mgr.advance_ref("main", novadb_core::ObjectId::from_canonical_bytes(b"c1")).await.unwrap();
        mgr.checkout("main").await.unwrap();
        assert!(mgr.delete_branch("main", false).await.is_err());
        assert!(mgr.delete_branch("main", true).await.is_ok());
    }

    #[tokio::test]
    async fn fork_rejects_existing_branch_name() {
        let store = Arc::new(MemoryStore::new());
        let mgr = BranchManager::new(store);
        mgr.advance_ref("main", novadb_core::ObjectId::from_canonical_bytes(b"c1")).await.unwrap();
        mgr.fork("feature", None).await.unwrap();
        assert!(mgr.fork("feature", None).await.is_err());
    }
}
