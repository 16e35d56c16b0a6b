//! Identifiers: content hashes (`ObjectId`) and entity ids (`EntityId`).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Content hash of a canonically-serialized payload (commit, tree, blob).
///
/// Mirrors the teacher's `gitnext_core::ObjectId`: BLAKE3 of the canonical
/// byte form is the sole identity used internally (spec.md invariant 6,
/// content-hash stability).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ObjectId {
    hash: [u8; 32],
}

impl ObjectId {
    pub fn from_canonical_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self {
            hash: *hash.as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { hash: bytes }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_encode(&self.hash))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Opaque 128-bit entity identifier (noun or verb), string-encoded.
///
/// The first two hex characters of the underlying UUID form the *shard
/// tag* used to fan out on-disk paths (spec.md GLOSSARY, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First two hex digits of the id, used as a filesystem/prefix fan-out
    /// device only (spec.md GLOSSARY "Shard tag").
    pub fn shard_tag(&self) -> String {
        let s = self.0.simple().to_string();
        s[0..2].to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}
