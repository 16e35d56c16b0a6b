//! Noun/verb domain model, HNSW persisted node state, and VCS records
//! (spec.md §3 DATA MODEL).

use crate::id::EntityId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Closed set of noun types plus an escape hatch, per spec.md §3
/// ("from a fixed closed set of ~31 noun types plus `other`"). The exact
/// members are an Open Question spec.md leaves to the implementer;
/// recorded in DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "PascalCase")]
pub enum NounType {
    Person,
    Organization,
    Document,
    Concept,
    Event,
    Location,
    Project,
    Task,
    Email,
    Message,
    File,
    Image,
    Video,
    Audio,
    Code,
    Repository,
    Commit,
    Issue,
    PullRequest,
    Comment,
    Meeting,
    Note,
    Tag,
    Category,
    Product,
    Customer,
    Order,
    Invoice,
    Account,
    Device,
    Sensor,
    Other,
}

impl NounType {
    pub const ALL: &'static [NounType] = &[
        NounType::Person,
        NounType::Organization,
        NounType::Document,
        NounType::Concept,
        NounType::Event,
        NounType::Location,
        NounType::Project,
        NounType::Task,
        NounType::Email,
        NounType::Message,
        NounType::File,
        NounType::Image,
        NounType::Video,
        NounType::Audio,
        NounType::Code,
        NounType::Repository,
        NounType::Commit,
        NounType::Issue,
        NounType::PullRequest,
        NounType::Comment,
        NounType::Meeting,
        NounType::Note,
        NounType::Tag,
        NounType::Category,
        NounType::Product,
        NounType::Customer,
        NounType::Order,
        NounType::Invoice,
        NounType::Account,
        NounType::Device,
        NounType::Sensor,
        NounType::Other,
    ];

    /// Lowercase path segment used in the on-disk layout (spec.md §6).
    pub fn as_path_segment(&self) -> &'static str {
        match self {
            NounType::Person => "person",
            NounType::Organization => "organization",
            NounType::Document => "document",
            NounType::Concept => "concept",
            NounType::Event => "event",
            NounType::Location => "location",
            NounType::Project => "project",
            NounType::Task => "task",
            NounType::Email => "email",
            NounType::Message => "message",
            NounType::File => "file",
            NounType::Image => "image",
            NounType::Video => "video",
            NounType::Audio => "audio",
            NounType::Code => "code",
            NounType::Repository => "repository",
            NounType::Commit => "commit",
            NounType::Issue => "issue",
            NounType::PullRequest => "pull_request",
            NounType::Comment => "comment",
            NounType::Meeting => "meeting",
            NounType::Note => "note",
            NounType::Tag => "tag",
            NounType::Category => "category",
            NounType::Product => "product",
            NounType::Customer => "customer",
            NounType::Order => "order",
            NounType::Invoice => "invoice",
            NounType::Account => "account",
            NounType::Device => "device",
            NounType::Sensor => "sensor",
            NounType::Other => "other",
        }
    }
}

/// Closed set of verb (edge) types plus an escape hatch, per spec.md §3
/// ("from a fixed set of ~40 verb types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "PascalCase")]
pub enum VerbType {
    References,
    RelatesTo,
    DependsOn,
    Contains,
    PartOf,
    Owns,
    CreatedBy,
    ModifiedBy,
    AssignedTo,
    Mentions,
    Follows,
    LikedBy,
    CommentedOn,
    Replies,
    Links,
    Cites,
    Derives,
    Implements,
    Extends,
    Uses,
    Produces,
    Consumes,
    Triggers,
    Blocks,
    Requires,
    Supports,
    Contradicts,
    Precedes,
    Succeeds,
    LocatedAt,
    WorksAt,
    MemberOf,
    ManagedBy,
    Authored,
    Reviewed,
    Approved,
    Rejected,
    Shared,
    Tagged,
    Other,
}

impl VerbType {
    pub const ALL: &'static [VerbType] = &[
        VerbType::References,
        VerbType::RelatesTo,
        VerbType::DependsOn,
        VerbType::Contains,
        VerbType::PartOf,
        VerbType::Owns,
        VerbType::CreatedBy,
        VerbType::ModifiedBy,
        VerbType::AssignedTo,
        VerbType::Mentions,
        VerbType::Follows,
        VerbType::LikedBy,
        VerbType::CommentedOn,
        VerbType::Replies,
        VerbType::Links,
        VerbType::Cites,
        VerbType::Derives,
        VerbType::Implements,
        VerbType::Extends,
        VerbType::Uses,
        VerbType::Produces,
        VerbType::Consumes,
        VerbType::Triggers,
        VerbType::Blocks,
        VerbType::Requires,
        VerbType::Supports,
        VerbType::Contradicts,
        VerbType::Precedes,
        VerbType::Succeeds,
        VerbType::LocatedAt,
        VerbType::WorksAt,
        VerbType::MemberOf,
        VerbType::ManagedBy,
        VerbType::Authored,
        VerbType::Reviewed,
        VerbType::Approved,
        VerbType::Rejected,
        VerbType::Shared,
        VerbType::Tagged,
        VerbType::Other,
    ];
}

/// Vertex entity: typed, embedded, metadata-bearing (spec.md §3 "Noun").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Noun {
    pub id: EntityId,
    pub noun_type: NounType,
    pub vector: Vec<f32>,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub service: Option<String>,
}

/// Directed edge between two nouns (spec.md §3 "Verb").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verb {
    pub id: EntityId,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub verb_type: VerbType,
    pub vector: Vec<f32>,
    pub weight: Option<f32>,
    pub confidence: Option<f32>,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-noun persisted HNSW node state (spec.md §3 "HNSW node state").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HnswNodeState {
    pub level: usize,
    /// layer index -> neighbor ids at that layer.
    pub connections: BTreeMap<usize, HashSet<EntityId>>,
}

/// Shared HNSW system state (spec.md §3 "HNSW system state").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HnswSystemState {
    pub entry_point_id: Option<EntityId>,
    pub max_level: usize,
}

/// Commit signature, as recorded on a [`Commit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp_ms: i64,
}

/// Immutable snapshot pointer (spec.md §3 "Commit").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub tree_hash: crate::id::ObjectId,
    pub parent: Option<crate::id::ObjectId>,
    pub author: Signature,
    pub message: String,
    pub timestamp_ms: i64,
}

impl Commit {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // bincode gives a compact, field-order-stable encoding; commit
        // payloads have a fixed Rust-level field order so this is
        // deterministic across runs (spec.md invariant 6).
        bincode::serialize(self).expect("commit serialization cannot fail")
    }

    pub fn hash(&self) -> crate::id::ObjectId {
        crate::id::ObjectId::from_canonical_bytes(&self.canonical_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    Branch,
    Tag,
}

/// Named ref (spec.md §3 "Ref").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ref {
    pub name: String,
    pub commit_hash: crate::id::ObjectId,
    pub kind: RefKind,
}

/// Per-entity per-save snapshot index entry (spec.md §3 "Version record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub entity_id: EntityId,
    pub version: u64,
    pub branch: String,
    pub tag: Option<String>,
    pub description: Option<String>,
    pub content_hash: crate::id::ObjectId,
    pub commit_hash: Option<crate::id::ObjectId>,
    pub timestamp_ms: i64,
}

/// A stored, addressable entity payload: either a noun or a verb. Used by
/// the version manager, which is entity-kind agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntityRecord {
    Noun(Noun),
    Verb(Verb),
}

impl EntityRecord {
    pub fn id(&self) -> EntityId {
        match self {
            EntityRecord::Noun(n) => n.id,
            EntityRecord::Verb(v) => v.id,
        }
    }

    pub fn metadata(&self) -> &Value {
        match self {
            EntityRecord::Noun(n) => &n.metadata,
            EntityRecord::Verb(v) => &v.metadata,
        }
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("entity record serialization cannot fail")
    }

    pub fn content_hash(&self) -> crate::id::ObjectId {
        crate::id::ObjectId::from_canonical_bytes(&self.canonical_bytes())
    }
}

pub type MetadataDict = HashMap<String, Value>;
