//! Prefix-tree flamegraph aggregation.
//!
//! A [`Builder`] owns a live tree that many sampler threads mutate
//! concurrently through [`Builder::add`]. Periodically the collector calls
//! [`Builder::snapshot_and_reset`] to swap the live root for a fresh one and
//! obtain an immutable [`Frame`] snapshot whose children are ordered by
//! descending value. Snapshots serialize to the JSON chunk format carried on
//! the wire and stored in `.fgo` record files.

use thiserror::Error;

mod builder;
mod diff;
pub mod fgo;
mod frame;

pub use builder::{Builder, Sample};
pub use diff::diff;
pub use frame::{Frame, Row};

/// Pseudo-stack label for garbage collection pauses.
pub const GC_LABEL: &str = "(GC)";
/// Pseudo-stack label for heap size deltas.
pub const HEAP_LABEL: &str = "(Heap)";
/// Pseudo-stack label for blocked task counts.
pub const BLOCKED_LABEL: &str = "(Blocked)";

#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlamegraphError>;
