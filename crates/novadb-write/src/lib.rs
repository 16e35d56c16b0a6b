//! Write buffer, coalescer and adaptive backpressure (C5, spec.md §4.3).

pub mod backpressure;
pub mod buffer;
pub mod coalescer;

pub use backpressure::{Backpressure, Band, BandThresholds, BufferParams, Priority, PermitToken, params_for_band};
pub use buffer::{FlushFailure, WriteBuffer};
pub use coalescer::{Coalescer, Op};
