//! Deep structural diff over entity payloads (§4.10).

use novadb_core::{path_to_string, PathSegment, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub max_depth: Option<usize>,
    pub ignore_fields: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub path: String,
    pub from: Value,
    pub to: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Diff {
    pub added: Vec<Change>,
    pub removed: Vec<Change>,
    pub modified: Vec<Change>,
    pub type_changed: Vec<Change>,
    pub identical: bool,
    pub total_changes: usize,
}

pub fn diff(from: &Value, to: &Value, opts: &DiffOptions) -> Diff {
    let mut out = Diff::default();
    walk(&mut Vec::new(), Some(from), Some(to), 0, opts, &mut out);
    out.total_changes = out.added.len() + out.removed.len() + out.modified.len() + out.type_changed.len();
    out.identical = out.total_changes == 0;
    out
}

fn walk(
    prefix: &mut Vec<PathSegment>,
    from: Option<&Value>,
    to: Option<&Value>,
    depth: usize,
    opts: &DiffOptions,
    out: &mut Diff,
) {
    let path_str = path_to_string(prefix);
    if !path_str.is_empty() && opts.ignore_fields.contains(&path_str) {
        return;
    }

    if let Some(max_depth) = opts.max_depth {
        if depth > max_depth {
            let (f, t) = (from.cloned_or_null(), to.cloned_or_null());
            if f != t {
                out.modified.push(Change { path: path_str, from: f, to: t });
            }
            return;
        }
    }

    match (from, to) {
        (None, None) => {}
        (None, Some(t)) => collect_leaves_into(prefix, t, opts, &mut out.added),
        (Some(f), None) => collect_leaves_into(prefix, f, opts, &mut out.removed),
        (Some(Value::Obj(fm)), Some(Value::Obj(tm))) => {
            let mut keys: Vec<&String> = fm.keys().chain(tm.keys()).collect();
            keys.sort();
            keys.dedup();
            for k in keys {
                prefix.push(PathSegment::Key(k.clone()));
                walk(prefix, fm.get(k), tm.get(k), depth + 1, opts, out);
                prefix.pop();
            }
        }
        (Some(Value::Arr(fa)), Some(Value::Arr(ta))) => {
            // Length changes surface as added/removed at the tail.
            let max_len = fa.len().max(ta.len());
            for i in 0..max_len {
                prefix.push(PathSegment::Index(i));
                walk(prefix, fa.get(i), ta.get(i), depth + 1, opts, out);
                prefix.pop();
            }
        }
        (Some(f), Some(t)) if f.type_name() != t.type_name() => {
            out.type_changed.push(Change { path: path_str, from: f.clone(), to: t.clone() });
        }
        (Some(f), Some(t)) => {
            if f != t {
                out.modified.push(Change { path: path_str, from: f.clone(), to: t.clone() });
            }
        }
    }
}

trait OrNull {
    fn cloned_or_null(self) -> Value;
}
impl OrNull for Option<&Value> {
    fn cloned_or_null(self) -> Value {
        self.cloned().unwrap_or(Value::Null)
    }
}

fn collect_leaves_into(prefix: &[PathSegment], value: &Value, opts: &DiffOptions, target: &mut Vec<Change>) {
    if value.is_scalar() || matches!(value, Value::Null) {
        let path_str = path_to_string(prefix);
        if opts.ignore_fields.contains(&path_str) {
            return;
        }
        target.push(Change { path: path_str, from: Value::Null, to: value.clone() });
        return;
    }
    for (rel_path, leaf) in value.leaf_paths() {
        let mut full = prefix.to_vec();
        full.extend(rel_path);
        let path_str = path_to_string(&full);
        if opts.ignore_fields.contains(&path_str) {
            continue;
        }
        target.push(Change { path: path_str, from: Value::Null, to: leaf.clone() });
    }
}
