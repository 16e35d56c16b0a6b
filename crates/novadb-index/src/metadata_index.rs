//! Metadata index (C7, spec.md §4.5): inverted `(field, value) -> id-set`
//! postings, a filter AST and its interpreter, and a cardinality-ordered
//! planner.

use dashmap::{DashMap, DashSet};
use novadb_core::{path_to_string, EntityId, PathSegment, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Filter AST evaluated against the metadata index (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    Exists { field: String },
    Regex { field: String, pattern: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Array field contains every listed value (order-independent).
    All { field: String, values: Vec<Value> },
    /// Array field has exactly this many elements.
    Size { field: String, size: usize },
    /// Array field contains this value.
    Includes { field: String, value: Value },
}

fn value_key(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Num(n) => format!("n:{}", n.to_bits()),
        Value::Str(s) if s.len() <= 200 => format!("s:{s}"),
        // Filename safety: oversized values collapse to a content hash;
        // the raw value stays recoverable via `value_dict`.
        Value::Str(s) => format!("h:{}", novadb_core::ObjectId::from_canonical_bytes(s.as_bytes())),
        _ => "unindexable".to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Walks `value`, recording every array found (at any depth) as
/// `(field_path, elements)`, to support `includes`/`all`/`size`.
fn collect_arrays(value: &Value, prefix: &mut Vec<PathSegment>, out: &mut Vec<(String, Vec<Value>)>) {
    match value {
        Value::Arr(items) => {
            out.push((path_to_string(prefix), items.clone()));
            for (i, item) in items.iter().enumerate() {
                prefix.push(PathSegment::Index(i));
                collect_arrays(item, prefix, out);
                prefix.pop();
            }
        }
        Value::Obj(map) => {
            for (k, v) in map {
                prefix.push(PathSegment::Key(k.clone()));
                collect_arrays(v, prefix, out);
                prefix.pop();
            }
        }
        _ => {}
    }
}

#[derive(Default)]
pub struct MetadataIndex {
    /// (field, value key) -> matching ids.
    postings: DashMap<(String, String), DashSet<EntityId>>,
    /// field -> set of value keys ever seen (drives `exists`/range scans).
    field_value_keys: DashMap<String, DashSet<String>>,
    /// value key -> the original value (range scans and filename-safety
    /// recovery both need this).
    value_dict: DashMap<String, Value>,
    /// array field path -> (value key -> ids) for includes/all.
    array_element_postings: DashMap<(String, String), DashSet<EntityId>>,
    /// (array field path, length) -> ids, for `size`.
    array_length_index: DashMap<(String, usize), DashSet<EntityId>>,
    all_ids: DashSet<EntityId>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot-clones postings for a forked branch (spec.md §4.9 fork step
    /// 3); see `GraphIndex::fork` for why a clone rather than `Hnsw`-style
    /// COW sharing is the right tradeoff here.
    pub fn fork(&self) -> MetadataIndex {
        MetadataIndex {
            postings: self.postings.clone(),
            field_value_keys: self.field_value_keys.clone(),
            value_dict: self.value_dict.clone(),
            array_element_postings: self.array_element_postings.clone(),
            array_length_index: self.array_length_index.clone(),
            all_ids: self.all_ids.clone(),
        }
    }

    pub fn add(&self, id: EntityId, metadata: &Value) {
        self.all_ids.insert(id);

        for (path, leaf) in metadata.leaf_paths() {
            if !leaf.is_scalar() && !matches!(leaf, Value::Null) {
                continue;
            }
            let field = path_to_string(&path);
            let key = value_key(leaf);
            self.value_dict.insert(key.clone(), leaf.clone());
            self.field_value_keys.entry(field.clone()).or_default().insert(key.clone());
            self.postings.entry((field, key)).or_default().insert(id);
        }

        let mut arrays = Vec::new();
        collect_arrays(metadata, &mut Vec::new(), &mut arrays);
        for (field, elements) in arrays {
            self.array_length_index
                .entry((field.clone(), elements.len()))
                .or_default()
                .insert(id);
            for elem in &elements {
                if elem.is_scalar() || matches!(elem, Value::Null) {
                    let key = value_key(elem);
                    self.value_dict.insert(key.clone(), elem.clone());
                    self.array_element_postings
                        .entry((field.clone(), key))
                        .or_default()
                        .insert(id);
                }
            }
        }
    }

    pub fn remove(&self, id: EntityId, metadata: &Value) {
        self.all_ids.remove(&id);

        for (path, leaf) in metadata.leaf_paths() {
            if !leaf.is_scalar() && !matches!(leaf, Value::Null) {
                continue;
            }
            let field = path_to_string(&path);
            let key = value_key(leaf);
            if let Some(set) = self.postings.get(&(field, key)) {
                set.remove(&id);
            }
        }

        let mut arrays = Vec::new();
        collect_arrays(metadata, &mut Vec::new(), &mut arrays);
        for (field, elements) in arrays {
            if let Some(set) = self.array_length_index.get(&(field.clone(), elements.len())) {
                set.remove(&id);
            }
            for elem in &elements {
                if elem.is_scalar() || matches!(elem, Value::Null) {
                    let key = value_key(elem);
                    if let Some(set) = self.array_element_postings.get(&(field.clone(), key)) {
                        set.remove(&id);
                    }
                }
            }
        }
    }

    /// Rebuilds the whole index from a fresh walk of entries (spec.md §4.5
    /// "a rebuild walks all metadata records and reconstructs postings").
    pub fn rebuild(&self, entries: impl Iterator<Item = (EntityId, Value)>) {
        self.postings.clear();
        self.field_value_keys.clear();
        self.value_dict.clear();
        self.array_element_postings.clear();
        self.array_length_index.clear();
        self.all_ids.clear();
        for (id, metadata) in entries {
            self.add(id, &metadata);
        }
    }

    fn posting_ids(&self, field: &str, value: &Value) -> HashSet<EntityId> {
        self.postings
            .get(&(field.to_string(), value_key(value)))
            .map(|s| s.iter().map(|e| *e).collect())
            .unwrap_or_default()
    }

    /// Rough size used to order `And` branches cheapest-first; `usize::MAX`
    /// marks a residual predicate evaluated only once cheaper branches have
    /// narrowed the candidate set (spec.md §4.5 planner).
    fn estimate_cardinality(&self, filter: &Filter) -> usize {
        match filter {
            Filter::Eq { field, value } => self
                .postings
                .get(&(field.clone(), value_key(value)))
                .map(|s| s.len())
                .unwrap_or(0),
            Filter::In { values, .. } => values.len().saturating_mul(64),
            Filter::Exists { field } => self
                .field_value_keys
                .get(field)
                .map(|keys| keys.iter().map(|k| k.len()).sum())
                .unwrap_or(0),
            Filter::And(sub) => sub.iter().map(|f| self.estimate_cardinality(f)).min().unwrap_or(0),
            Filter::Or(sub) => sub.iter().map(|f| self.estimate_cardinality(f)).sum(),
            _ => usize::MAX,
        }
    }

    pub fn query(&self, filter: &Filter) -> HashSet<EntityId> {
        match filter {
            Filter::Eq { field, value } => self.posting_ids(field, value),
            Filter::In { field, values } => {
                let mut out = HashSet::new();
                for v in values {
                    out.extend(self.posting_ids(field, v));
                }
                out
            }
            Filter::Nin { field, values } => {
                let mut excluded = HashSet::new();
                for v in values {
                    excluded.extend(self.posting_ids(field, v));
                }
                self.all_ids().difference(&excluded).copied().collect()
            }
            Filter::Gt { field, value } => self.range(field, value, |ord| ord == Ordering::Greater),
            Filter::Gte { field, value } => {
                self.range(field, value, |ord| ord != Ordering::Less)
            }
            Filter::Lt { field, value } => self.range(field, value, |ord| ord == Ordering::Less),
            Filter::Lte { field, value } => {
                self.range(field, value, |ord| ord != Ordering::Greater)
            }
            Filter::Exists { field } => {
                let mut out = HashSet::new();
                if let Some(keys) = self.field_value_keys.get(field) {
                    for key in keys.iter() {
                        if let Some(set) = self.postings.get(&(field.clone(), key.clone())) {
                            out.extend(set.iter().map(|e| *e));
                        }
                    }
                }
                out
            }
            Filter::Regex { field, pattern } => {
                let mut out = HashSet::new();
                let Ok(re) = Regex::new(pattern) else {
                    return out;
                };
                if let Some(keys) = self.field_value_keys.get(field) {
                    for key in keys.iter() {
                        if let Some(Value::Str(s)) = self.value_dict.get(key.as_str()).map(|v| v.clone()) {
                            if re.is_match(&s) {
                                if let Some(set) = self.postings.get(&(field.clone(), key.clone())) {
                                    out.extend(set.iter().map(|e| *e));
                                }
                            }
                        }
                    }
                }
                out
            }
            Filter::And(sub) => {
                if sub.is_empty() {
                    return self.all_ids();
                }
                let mut ordered: Vec<&Filter> = sub.iter().collect();
                ordered.sort_by_key(|f| self.estimate_cardinality(f));
                let mut acc: Option<HashSet<EntityId>> = None;
                for f in ordered {
                    let ids = self.query(f);
                    acc = Some(match acc {
                        None => ids,
                        Some(prev) => prev.intersection(&ids).copied().collect(),
                    });
                    if acc.as_ref().is_some_and(|s| s.is_empty()) {
                        break;
                    }
                }
                acc.unwrap_or_default()
            }
            Filter::Or(sub) => {
                let mut out = HashSet::new();
                for f in sub {
                    out.extend(self.query(f));
                }
                out
            }
            Filter::Not(inner) => {
                let excluded = self.query(inner);
                self.all_ids().difference(&excluded).copied().collect()
            }
            Filter::Includes { field, value } => self
                .array_element_postings
                .get(&(field.clone(), value_key(value)))
                .map(|s| s.iter().map(|e| *e).collect())
                .unwrap_or_default(),
            Filter::All { field, values } => {
                if values.is_empty() {
                    return self.all_ids();
                }
                let mut acc: Option<HashSet<EntityId>> = None;
                for v in values {
                    let ids: HashSet<EntityId> = self
                        .array_element_postings
                        .get(&(field.clone(), value_key(v)))
                        .map(|s| s.iter().map(|e| *e).collect())
                        .unwrap_or_default();
                    acc = Some(match acc {
                        None => ids,
                        Some(prev) => prev.intersection(&ids).copied().collect(),
                    });
                }
                acc.unwrap_or_default()
            }
            Filter::Size { field, size } => self
                .array_length_index
                .get(&(field.clone(), *size))
                .map(|s| s.iter().map(|e| *e).collect())
                .unwrap_or_default(),
        }
    }

    fn range(&self, field: &str, threshold: &Value, accept: impl Fn(Ordering) -> bool) -> HashSet<EntityId> {
        let mut out = HashSet::new();
        let Some(keys) = self.field_value_keys.get(field) else {
            return out;
        };
        for key in keys.iter() {
            let Some(v) = self.value_dict.get(key.as_str()).map(|v| v.clone()) else {
                continue;
            };
            if let Some(ord) = compare_values(&v, threshold) {
                if accept(ord) {
                    if let Some(set) = self.postings.get(&(field.to_string(), key.clone())) {
                        out.extend(set.iter().map(|e| *e));
                    }
                }
            }
        }
        out
    }

    fn all_ids(&self) -> HashSet<EntityId> {
        self.all_ids.iter().map(|e| *e).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Value::Obj(m)
    }

    #[test]
    fn eq_and_range_queries() {
        let idx = MetadataIndex::new();
        let a = EntityId::new();
        let b = EntityId::new();
        idx.add(a, &obj(&[("age", Value::Num(30.0))]));
        idx.add(b, &obj(&[("age", Value::Num(12.0))]));

        let adults = idx.query(&Filter::Gte { field: "age".into(), value: Value::Num(18.0) });
        assert_eq!(adults, HashSet::from([a]));
    }

    #[test]
    fn and_intersects_and_or_unions() {
        let idx = MetadataIndex::new();
        let a = EntityId::new();
        let b = EntityId::new();
        idx.add(a, &obj(&[("type", Value::Str("person".into())), ("active", Value::Bool(true))]));
        idx.add(b, &obj(&[("type", Value::Str("person".into())), ("active", Value::Bool(false))]));

        let active_people = idx.query(&Filter::And(vec![
            Filter::Eq { field: "type".into(), value: Value::Str("person".into()) },
            Filter::Eq { field: "active".into(), value: Value::Bool(true) },
        ]));
        assert_eq!(active_people, HashSet::from([a]));

        let either = idx.query(&Filter::Or(vec![
            Filter::Eq { field: "active".into(), value: Value::Bool(true) },
            Filter::Eq { field: "active".into(), value: Value::Bool(false) },
        ]));
        assert_eq!(either, HashSet::from([a, b]));
    }

    #[test]
    fn includes_and_size_on_array_fields() {
        let idx = MetadataIndex::new();
        let a = EntityId::new();
        idx.add(
            a,
            &obj(&[("tags", Value::Arr(vec![Value::Str("x".into()), Value::Str("y".into())]))]),
        );
        let found = idx.query(&Filter::Includes { field: "tags".into(), value: Value::Str("x".into()) });
        assert_eq!(found, HashSet::from([a]));
        let sized = idx.query(&Filter::Size { field: "tags".into(), size: 2 });
        assert_eq!(sized, HashSet::from([a]));
    }

    #[test]
    fn remove_drops_from_postings() {
        let idx = MetadataIndex::new();
        let a = EntityId::new();
        let meta = obj(&[("type", Value::Str("person".into()))]);
        idx.add(a, &meta);
        idx.remove(a, &meta);
        let found = idx.query(&Filter::Eq { field: "type".into(), value: Value::Str("person".into()) });
        assert!(found.is_empty());
    }

    #[test]
    fn not_excludes_from_universe() {
        let idx = MetadataIndex::new();
        let a = EntityId::new();
        let b = EntityId::new();
        idx.add(a, &obj(&[("active", Value::Bool(true))]));
        idx.add(b, &obj(&[("active", Value::Bool(false))]));
        let inactive = idx.query(&Filter::Not(Box::new(Filter::Eq {
            field: "active".into(),
            value: Value::Bool(true),
        })));
        assert_eq!(inactive, HashSet::from([b]));
    }
}
