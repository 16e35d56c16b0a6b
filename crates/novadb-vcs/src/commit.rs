//! Commit manager (C11, spec.md §4.9): canonical tree hashing, commit
//! chains, and history/ancestry walks over the single-parent chain.

use crate::branch::BranchManager;
use async_trait::async_trait;
use novadb_core::{Commit, ObjectId, Result, Signature, Value};
use novadb_storage::ObjectStore;
use std::collections::HashSet;
use std::sync::Arc;

fn commit_key(hash: ObjectId) -> String {
    format!("objects/commits/{hash}.json")
}

/// Supplies the canonical content a commit's `treeHash` is computed over.
/// Kept out of this crate so it stays independent of `novadb-index`'s
/// storage layout; `novadb-engine` implements it against the live entity
/// and graph indexes.
#[async_trait]
pub trait TreeSource: Send + Sync {
    async fn tree_snapshot(&self, branch: &str) -> Result<Value>;
}

pub struct CommitManager<S: ObjectStore> {
    store: Arc<S>,
    branches: Arc<BranchManager<S>>,
}

impl<S: ObjectStore + 'static> CommitManager<S> {
    pub fn new(store: Arc<S>, branches: Arc<BranchManager<S>>) -> Self {
        Self { store, branches }
    }

    /// Flushing write buffers (spec.md §4.9 commit step 1) is the caller's
    /// responsibility, since buffers live in `novadb-write` and this crate
    /// has no dependency on it; `novadb-engine` flushes before calling this.
    pub async fn commit(
        &self,
        branch: &str,
        message: impl Into<String>,
        author: Signature,
        tree_source: &dyn TreeSource,
    ) -> Result<ObjectId> {
        let tree = tree_source.tree_snapshot(branch).await?;
        let tree_hash = tree.canonical_hash();

        let parent = self.branches.read_ref(branch).await?.map(|r| r.commit_hash);
        let commit = Commit {
            tree_hash,
            parent,
            author,
            message: message.into(),
            timestamp_ms: now_ms(),
        };
        let commit_hash = commit.hash();
        let bytes = serde_json::to_vec(&commit).expect("commit serializes");
        self.store.put(&commit_key(commit_hash), bytes.into()).await?;
        self.branches.advance_ref(branch, commit_hash).await?;
        Ok(commit_hash)
    }

    pub async fn get_commit(&self, hash: ObjectId) -> Result<Option<Commit>> {
        let bytes = self.store.get(&commit_key(hash)).await?;
        Ok(bytes.map(|b| serde_json::from_slice(&b).expect("stored commit is valid")))
    }

    /// Walks the parent chain from `branch`'s head, newest first.
    pub async fn get_history(&self, branch: &str, limit: Option<usize>) -> Result<Vec<Commit>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        let Some(head) = self.branches.read_ref(branch).await?.map(|r| r.commit_hash) else {
            return Ok(out);
        };
        let mut cursor = Some(head);
        while let Some(hash) = cursor {
            if out.len() >= limit {
                break;
            }
            let Some(commit) = self.get_commit(hash).await? else { break };
            cursor = commit.parent;
            out.push(commit);
        }
        Ok(out)
    }

    pub async fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool> {
        let mut cursor = Some(descendant);
        let mut visited = HashSet::new();
        while let Some(hash) = cursor {
            if hash == ancestor {
                return Ok(true);
            }
            if !visited.insert(hash) {
                break;
            }
            let Some(commit) = self.get_commit(hash).await? else { break };
            cursor = commit.parent;
        }
        Ok(false)
    }

    /// Nearest common ancestor of two commits on (possibly diverged)
    /// single-parent chains.
    pub async fn merge_base(&self, a: ObjectId, b: ObjectId) -> Result<Option<ObjectId>> {
        let mut ancestors_of_a = HashSet::new();
        let mut cursor = Some(a);
        while let Some(hash) = cursor {
            if !ancestors_of_a.insert(hash) {
                break;
            }
            cursor = self.get_commit(hash).await?.and_then(|c| c.parent);
        }

        let mut cursor = Some(b);
        let mut visited = HashSet::new();
        while let Some(hash) = cursor {
            if ancestors_of_a.contains(&hash) {
                return Ok(Some(hash));
            }
            if !visited.insert(hash) {
                break;
            }
            cursor = self.get_commit(hash).await?.and_then(|c| c.parent);
        }
        Ok(None)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use novadb_storage_memory::MemoryStore;

    struct EmptyTree;
    #[async_trait]
    impl TreeSource for EmptyTree {
        async fn tree_snapshot(&self, _branch: &str) -> Result<Value> {
            Ok(Value::Obj(Default::default()))
        }
    }

    fn author() -> Signature {
        Signature { name: "tester".into(), email: "t@example.com".into(), timestamp_ms: 0 }
    }

    #[tokio::test]
    async fn commit_advances_branch_head_and_records_parent() {
        let store = Arc::new(MemoryStore::new());
        let branches = Arc::new(BranchManager::new(store.clone()));
        let commits = CommitManager::new(store, branches.clone());

        let first = commits.commit("main", "first", author(), &EmptyTree).await.unwrap();
        let head = branches.read_ref("main").await.unwrap().unwrap();
        assert_eq!(head.commit_hash, first);

        let second = commits.commit("main", "second", author(), &EmptyTree).await.unwrap();
        let second_commit = commits.get_commit(second).await.unwrap().unwrap();
        assert_eq!(second_commit.parent, Some(first));
    }

    #[tokio::test]
    async fn is_ancestor_and_history_walk_the_chain() {
        let store = Arc::new(MemoryStore::new());
        let branches = Arc::new(BranchManager::new(store.clone()));
        let commits = CommitManager::new(store, branches);

        let first = commits.commit("main", "first", author(), &EmptyTree).await.unwrap();
        let second = commits.commit("main", "second", author(), &EmptyTree).await.unwrap();

        assert!(commits.is_ancestor(first, second).await.unwrap());
        assert!(!commits.is_ancestor(second, first).await.unwrap());

        let history = commits.get_history("main", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "second");
    }
}
