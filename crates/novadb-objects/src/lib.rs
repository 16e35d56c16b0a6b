//! Validation and builder utilities for novadb's object model.
//!
//! Mirrors the teacher's `ObjectOps` trait and per-object builders, adapted
//! from git blobs/trees/commits to nouns/verbs/commits/version records.

use novadb_core::{
    Commit, EntityId, HnswNodeState, Noun, NounType, Ref, RefKind, Signature, Value, Verb,
    VerbType, VersionRecord,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ObjectError>;

/// Common validation/sizing surface over every stored object kind.
pub trait ObjectOps {
    fn validate(&self) -> Result<()>;
    fn size(&self) -> u64;
    fn is_empty(&self) -> bool;
}

impl ObjectOps for Noun {
    fn validate(&self) -> Result<()> {
        if self.vector.iter().any(|x| !x.is_finite()) {
            return Err(ObjectError::Invalid("vector contains non-finite component".into()));
        }
        if self.updated_at < self.created_at {
            return Err(ObjectError::Invalid("updated_at precedes created_at".into()));
        }
        validate_metadata_scalar_leaves(&self.metadata)
    }

    fn size(&self) -> u64 {
        (self.vector.len() * std::mem::size_of::<f32>()) as u64 + self.metadata.canonical_bytes().len() as u64
    }

    fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

impl ObjectOps for Verb {
    fn validate(&self) -> Result<()> {
        if self.source_id == self.target_id {
            return Err(ObjectError::Invalid("self-referential edges are not permitted".into()));
        }
        if let Some(w) = self.weight {
            if !w.is_finite() {
                return Err(ObjectError::Invalid("weight must be finite".into()));
            }
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(ObjectError::Invalid("confidence must be within [0, 1]".into()));
            }
        }
        validate_metadata_scalar_leaves(&self.metadata)
    }

    fn size(&self) -> u64 {
        (self.vector.len() * std::mem::size_of::<f32>()) as u64 + self.metadata.canonical_bytes().len() as u64
    }

    fn is_empty(&self) -> bool {
        self.vector.is_empty() && matches!(self.metadata, Value::Null)
    }
}

impl ObjectOps for Commit {
    fn validate(&self) -> Result<()> {
        if self.message.is_empty() {
            return Err(ObjectError::MissingField("message".into()));
        }
        self.author.validate()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        32 + self.parent.map(|_| 32).unwrap_or(0) + self.message.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

impl ObjectOps for Signature {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ObjectError::MissingField("name".into()));
        }
        if !self.email.contains('@') {
            return Err(ObjectError::Invalid(format!("invalid email: {}", self.email)));
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.name.len() as u64 + self.email.len() as u64 + 8
    }

    fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl ObjectOps for VersionRecord {
    fn validate(&self) -> Result<()> {
        if self.branch.is_empty() {
            return Err(ObjectError::MissingField("branch".into()));
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        32 + self.branch.len() as u64 + self.tag.as_ref().map(|t| t.len() as u64).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        false
    }
}

/// Only scalar/null leaves are indexable by the metadata index (spec.md
/// §4.7); reject metadata that bottoms out in something else, which cannot
/// happen via [`Value::from_json`] but can via hand-built trees.
fn validate_metadata_scalar_leaves(value: &Value) -> Result<()> {
    for (path, leaf) in value.leaf_paths() {
        if !leaf.is_scalar() && !matches!(leaf, Value::Null) {
            return Err(ObjectError::Invalid(format!(
                "metadata leaf at {} is not a scalar",
                novadb_core::path_to_string(&path)
            )));
        }
    }
    Ok(())
}

/// Builds a [`Noun`] with sensible timestamp defaults, mirroring the
/// teacher's `BlobBuilder`/`TreeBuilder` fluent style.
pub struct NounBuilder {
    id: EntityId,
    noun_type: Option<NounType>,
    vector: Vec<f32>,
    metadata: Value,
    created_at: i64,
    updated_at: i64,
    service: Option<String>,
}

impl NounBuilder {
    pub fn new(now_ms: i64) -> Self {
        Self {
            id: EntityId::new(),
            noun_type: None,
            vector: Vec::new(),
            metadata: Value::Obj(Default::default()),
            created_at: now_ms,
            updated_at: now_ms,
            service: None,
        }
    }

    pub fn id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    pub fn noun_type(mut self, t: NounType) -> Self {
        self.noun_type = Some(t);
        self
    }

    pub fn vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn build(self) -> Result<Noun> {
        let noun_type = self.noun_type.ok_or_else(|| ObjectError::MissingField("noun_type".into()))?;
        let noun = Noun {
            id: self.id,
            noun_type,
            vector: self.vector,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
            service: self.service,
        };
        noun.validate()?;
        Ok(noun)
    }
}

/// Builds a [`Verb`], mirroring [`NounBuilder`].
pub struct VerbBuilder {
    id: EntityId,
    source_id: Option<EntityId>,
    target_id: Option<EntityId>,
    verb_type: Option<VerbType>,
    vector: Vec<f32>,
    weight: Option<f32>,
    confidence: Option<f32>,
    metadata: Value,
    created_at: i64,
    updated_at: i64,
}

impl VerbBuilder {
    pub fn new(now_ms: i64) -> Self {
        Self {
            id: EntityId::new(),
            source_id: None,
            target_id: None,
            verb_type: None,
            vector: Vec::new(),
            weight: None,
            confidence: None,
            metadata: Value::Obj(Default::default()),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn source(mut self, id: EntityId) -> Self {
        self.source_id = Some(id);
        self
    }

    pub fn target(mut self, id: EntityId) -> Self {
        self.target_id = Some(id);
        self
    }

    pub fn verb_type(mut self, t: VerbType) -> Self {
        self.verb_type = Some(t);
        self
    }

    pub fn vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Result<Verb> {
        let source_id = self.source_id.ok_or_else(|| ObjectError::MissingField("source_id".into()))?;
        let target_id = self.target_id.ok_or_else(|| ObjectError::MissingField("target_id".into()))?;
        let verb_type = self.verb_type.ok_or_else(|| ObjectError::MissingField("verb_type".into()))?;
        let verb = Verb {
            id: self.id,
            source_id,
            target_id,
            verb_type,
            vector: self.vector,
            weight: self.weight,
            confidence: self.confidence,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        verb.validate()?;
        Ok(verb)
    }
}

/// Builds a [`Commit`], mirroring the teacher's `CommitBuilder`.
pub struct CommitBuilder {
    tree_hash: Option<novadb_core::ObjectId>,
    parent: Option<novadb_core::ObjectId>,
    author: Option<Signature>,
    message: String,
    timestamp_ms: i64,
}

impl CommitBuilder {
    pub fn new(now_ms: i64) -> Self {
        Self {
            tree_hash: None,
            parent: None,
            author: None,
            message: String::new(),
            timestamp_ms: now_ms,
        }
    }

    pub fn tree_hash(mut self, hash: novadb_core::ObjectId) -> Self {
        self.tree_hash = Some(hash);
        self
    }

    pub fn parent(mut self, parent: novadb_core::ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn build(self) -> Result<Commit> {
        let tree_hash = self.tree_hash.ok_or_else(|| ObjectError::MissingField("tree_hash".into()))?;
        let author = self.author.ok_or_else(|| ObjectError::MissingField("author".into()))?;
        let commit = Commit {
            tree_hash,
            parent: self.parent,
            author,
            message: self.message,
            timestamp_ms: self.timestamp_ms,
        };
        commit.validate()?;
        Ok(commit)
    }
}

/// Builds a branch or tag [`Ref`].
pub fn make_branch_ref(name: impl Into<String>, commit_hash: novadb_core::ObjectId) -> Ref {
    Ref {
        name: name.into(),
        commit_hash,
        kind: RefKind::Branch,
    }
}

pub fn make_tag_ref(name: impl Into<String>, commit_hash: novadb_core::ObjectId) -> Ref {
    Ref {
        name: name.into(),
        commit_hash,
        kind: RefKind::Tag,
    }
}

/// An empty node state for a freshly inserted noun before HNSW wiring runs.
pub fn empty_hnsw_node_state() -> HnswNodeState {
    HnswNodeState::default()
}
