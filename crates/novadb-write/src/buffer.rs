//! Per-object-kind write buffer: accumulates updates keyed by id,
//! deduplicates to the latest value, and decides when to flush
//! (spec.md §4.3).

use crate::backpressure::BufferParams;
use dashmap::DashMap;
use novadb_core::EntityId;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    retry_count: u32,
    enqueued_at: Instant,
}

/// A failure surfaced after `max_retries` flush attempts; the item is
/// dropped from the buffer once this is produced.
#[derive(Debug)]
pub struct FlushFailure<T> {
    pub id: EntityId,
    pub value: T,
    pub error: novadb_core::NovaError,
}

pub struct WriteBuffer<T> {
    kind: String,
    entries: DashMap<EntityId, Entry<T>>,
    max_retries: u32,
}

impl<T: Clone> WriteBuffer<T> {
    pub fn new(kind: impl Into<String>, max_retries: u32) -> Self {
        Self {
            kind: kind.into(),
            entries: DashMap::new(),
            max_retries,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stages `value` under `id`; a later call for the same id collapses to
    /// the latest value, per the dedup policy.
    pub fn stage(&self, id: EntityId, value: T) {
        self.entries
            .entry(id)
            .and_modify(|e| e.value = value.clone())
            .or_insert_with(|| Entry {
                value,
                retry_count: 0,
                enqueued_at: Instant::now(),
            });
    }

    fn oldest_age(&self) -> Duration {
        self.entries
            .iter()
            .map(|e| e.enqueued_at.elapsed())
            .max()
            .unwrap_or_default()
    }

    pub fn should_flush(&self, params: &BufferParams, force_flush: bool, under_pressure: bool) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        force_flush
            || under_pressure
            || self.entries.len() >= params.max_buffer_size
            || self.oldest_age() >= params.flush_interval
    }

    /// Drains every staged entry whose buffer length meets `min_flush_size`
    /// when not forced; returns `(id, value)` pairs in arbitrary order
    /// (downstream coalescing does not depend on order).
    pub fn drain(&self, params: &BufferParams, force_flush: bool) -> Vec<(EntityId, T)> {
        if !force_flush && self.entries.len() < params.min_flush_size {
            return Vec::new();
        }
        let ids: Vec<EntityId> = self.entries.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                out.push((id, entry.value));
            }
        }
        out
    }

    /// Re-enqueues `id` after a transient flush failure, bumping its retry
    /// count. Returns `Some(FlushFailure)` once `max_retries` is exceeded,
    /// in which case the item is not re-staged.
    pub fn requeue_after_failure(
        &self,
        id: EntityId,
        value: T,
        retry_count: u32,
        error: novadb_core::NovaError,
    ) -> Option<FlushFailure<T>> {
        if retry_count >= self.max_retries {
            return Some(FlushFailure { id, value, error });
        }
        self.entries.insert(
            id,
            Entry {
                value,
                retry_count: retry_count + 1,
                enqueued_at: Instant::now(),
            },
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::params_for_band;
    use crate::backpressure::Band;

    #[test]
    fn staging_same_id_twice_dedups_to_latest() {
        let buf: WriteBuffer<&'static str> = WriteBuffer::new("nouns", 3);
        let id = EntityId::new();
        buf.stage(id, "first");
        buf.stage(id, "second");
        assert_eq!(buf.len(), 1);
        let params = params_for_band(Band::Low);
        let drained = buf.drain(&params, true);
        assert_eq!(drained, vec![(id, "second")]);
    }

    #[test]
    fn drain_respects_min_flush_size_unless_forced() {
        let buf: WriteBuffer<u32> = WriteBuffer::new("verbs", 3);
        buf.stage(EntityId::new(), 1);
        let params = params_for_band(Band::Moderate); // min_flush_size = 10
        assert!(buf.drain(&params, false).is_empty());
        assert_eq!(buf.drain(&params, true).len(), 1);
    }

    #[test]
    fn retry_then_drop_after_max_retries() {
        let buf: WriteBuffer<u32> = WriteBuffer::new("metadata", 2);
        let id = EntityId::new();
        let err = novadb_core::NovaError::timeout("flush");
        assert!(buf.requeue_after_failure(id, 1, 0, err.clone()).is_none());
        assert_eq!(buf.len(), 1);
        assert!(buf.requeue_after_failure(id, 1, 1, err.clone()).is_none());
        let failure = buf.requeue_after_failure(id, 1, 2, err);
        assert!(failure.is_some());
    }
}
