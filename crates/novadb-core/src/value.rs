//! Canonical, order-stable value tree used for noun/verb metadata and for
//! the filter AST the metadata index interprets (spec.md §4.5, §9).
//!
//! Represented as a tagged variant rather than reusing `serde_json::Value`
//! directly so that object keys are always `BTreeMap`-ordered (spec.md §6:
//! "All JSON is canonicalized: keys sorted lexicographically") and so the
//! filter interpreter (`novadb-index`) can match on it exhaustively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Stored as bit pattern through `OrderedFloat`-style comparison so two
    /// values hash/compare identically regardless of float formatting
    /// ambiguity (spec.md invariant 6).
    Num(f64),
    Str(String),
    Arr(Vec<Value>),
    Obj(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a.to_bits() == b.to_bits() || a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Arr(a), Value::Arr(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Arr(_) => "array",
            Value::Obj(_) => "object",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Num(_) | Value::Bool(_))
    }

    /// Canonical serialization: `BTreeMap` already sorts keys; `serde_json`
    /// emits numbers in shortest round-trip form. No trailing whitespace.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Value serialization cannot fail")
    }

    pub fn canonical_hash(&self) -> crate::id::ObjectId {
        crate::id::ObjectId::from_canonical_bytes(&self.canonical_bytes())
    }

    /// Walk a dotted/indexed path (`metadata.address.street`, `tags[2]`).
    pub fn get_path(&self, path: &[PathSegment]) -> Option<&Value> {
        let mut cur = self;
        for seg in path {
            cur = match (cur, seg) {
                (Value::Obj(map), PathSegment::Key(k)) => map.get(k)?,
                (Value::Arr(arr), PathSegment::Index(i)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Enumerate every leaf path of scalar (and null) values, used by the
    /// metadata indexer's indexable-scope walk and by the diff engine.
    pub fn leaf_paths(&self) -> Vec<(Vec<PathSegment>, &Value)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        prefix: &mut Vec<PathSegment>,
        out: &mut Vec<(Vec<PathSegment>, &'a Value)>,
    ) {
        match self {
            Value::Obj(map) => {
                for (k, v) in map {
                    prefix.push(PathSegment::Key(k.clone()));
                    v.collect_leaves(prefix, out);
                    prefix.pop();
                }
            }
            Value::Arr(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    prefix.push(PathSegment::Index(i));
                    v.collect_leaves(prefix, out);
                    prefix.pop();
                }
            }
            _ => out.push((prefix.clone(), self)),
        }
    }

    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(a) => Value::Arr(a.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Obj(o.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, ".{k}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Render a path list the way spec.md §4.10 shows them:
/// `metadata.address.street`, `tags[2]`.
pub fn path_to_string(path: &[PathSegment]) -> String {
    let mut s = String::new();
    for (i, seg) in path.iter().enumerate() {
        match seg {
            PathSegment::Key(k) => {
                if i == 0 {
                    s.push_str(k);
                } else {
                    s.push('.');
                    s.push_str(k);
                }
            }
            PathSegment::Index(idx) => {
                s.push('[');
                s.push_str(&idx.to_string());
                s.push(']');
            }
        }
    }
    s
}
