//! Backpressure bands and the permit system that paces C5 → C1 traffic
//! (spec.md §4.3). Priority lanes mirror the weighted-semaphore throttling
//! pattern used elsewhere in the corpus for rate-limited request handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    Flush,
    Read,
}

/// Buffer sizing tuple driven by the current backpressure band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferParams {
    pub max_buffer_size: usize,
    pub flush_interval: Duration,
    pub min_flush_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Band {
    #[default]
    Low,
    Moderate,
    High,
    Extreme,
}

/// Queue-depth thresholds that select a [`Band`]. Configurable so
/// `EngineConfig` can tune them; defaults are the ones spec.md §6 leaves
/// unspecified in value but fixed in shape (four bands).
#[derive(Debug, Clone, Copy)]
pub struct BandThresholds {
    pub moderate_at: usize,
    pub high_at: usize,
    pub extreme_at: usize,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            moderate_at: 100,
            high_at: 500,
            extreme_at: 1000,
        }
    }
}

impl BandThresholds {
    pub fn band_for(&self, queue_depth: usize) -> Band {
        if queue_depth >= self.extreme_at {
            Band::Extreme
        } else if queue_depth >= self.high_at {
            Band::High
        } else if queue_depth >= self.moderate_at {
            Band::Moderate
        } else {
            Band::Low
        }
    }
}

pub fn params_for_band(band: Band) -> BufferParams {
    match band {
        Band::Low => BufferParams {
            max_buffer_size: 50,
            flush_interval: Duration::from_millis(500),
            min_flush_size: 1,
        },
        Band::Moderate => BufferParams {
            max_buffer_size: 200,
            flush_interval: Duration::from_millis(250),
            min_flush_size: 10,
        },
        Band::High => BufferParams {
            max_buffer_size: 500,
            flush_interval: Duration::from_millis(100),
            min_flush_size: 50,
        },
        Band::Extreme => BufferParams {
            max_buffer_size: 2000,
            flush_interval: Duration::from_millis(25),
            min_flush_size: 200,
        },
    }
}

/// A granted slot; dropping it (or calling [`Backpressure::release`])
/// returns capacity to the lane it was drawn from.
pub struct PermitToken {
    priority: Priority,
    _permit: OwnedSemaphorePermit,
}

/// Tracks inflight storage operations per priority lane and exposes the
/// current band from an externally-reported queue depth.
pub struct Backpressure {
    normal: Arc<Semaphore>,
    flush: Arc<Semaphore>,
    read: Arc<Semaphore>,
    thresholds: BandThresholds,
    queue_depth: AtomicUsize,
}

impl Backpressure {
    /// `total_capacity` is split across lanes: reads get the largest share
    /// since they are latency-sensitive, then flush, then normal writes
    /// (spec.md §4.3: "Priorities: normal writes, flush ops (higher), reads
    /// (highest)").
    pub fn new(total_capacity: usize) -> Self {
        let total_capacity = total_capacity.max(3);
        let read_cap = (total_capacity * 2 / 4).max(1);
        let flush_cap = (total_capacity / 4).max(1);
        let normal_cap = total_capacity.saturating_sub(read_cap + flush_cap).max(1);
        Self {
            normal: Arc::new(Semaphore::new(normal_cap)),
            flush: Arc::new(Semaphore::new(flush_cap)),
            read: Arc::new(Semaphore::new(read_cap)),
            thresholds: BandThresholds::default(),
            queue_depth: AtomicUsize::new(0),
        }
    }

    pub fn with_thresholds(mut self, thresholds: BandThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn report_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn current_band(&self) -> Band {
        self.thresholds.band_for(self.queue_depth.load(Ordering::Relaxed))
    }

    pub fn is_under_pressure(&self) -> bool {
        !matches!(self.current_band(), Band::Low)
    }

    /// Awaits a permit for `priority`; blocks the caller while the lane is
    /// saturated. This is the intended flow-control surface for a caller
    /// issuing e.g. `saveNoun` on a saturated system.
    pub async fn request_permission(&self, priority: Priority) -> PermitToken {
        let sem = match priority {
            Priority::Normal => &self.normal,
            Priority::Flush => &self.flush,
            Priority::Read => &self.read,
        };
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .expect("backpressure semaphore is never closed");
        PermitToken {
            priority,
            _permit: permit,
        }
    }

    /// Releases `token`. `ok` is informational only (surfaced to logging);
    /// capacity is returned to the lane regardless via `Drop`.
    pub fn release(&self, token: PermitToken, ok: bool) {
        if !ok {
            tracing::debug!(priority = ?token.priority, "released permit after failed operation");
        }
        drop(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_thresholds_are_monotonic() {
        let t = BandThresholds::default();
        assert_eq!(t.band_for(0), Band::Low);
        assert_eq!(t.band_for(100), Band::Moderate);
        assert_eq!(t.band_for(500), Band::High);
        assert_eq!(t.band_for(1000), Band::Extreme);
    }

    #[tokio::test]
    async fn permits_are_independent_per_lane() {
        let bp = Backpressure::new(4);
        let t1 = bp.request_permission(Priority::Read).await;
        let t2 = bp.request_permission(Priority::Normal).await;
        bp.release(t1, true);
        bp.release(t2, true);
    }
}
