//! Derived-metric extraction from ingested snapshots.
//!
//! The gateway builds one `name → f64` map per ingested chunk from the
//! snapshot's pseudo-bands and evaluates every rule against it. Names the
//! snapshot does not carry simply stay absent and resolve to 0 inside the
//! expression engine.

use std::collections::HashMap;

use flamegraph::{Frame, BLOCKED_LABEL, GC_LABEL, HEAP_LABEL};

pub const BLOCKED_GOROUTINES: &str = "blocked_goroutines";
pub const GC_PAUSE_NS: &str = "gc_pause_ns";
pub const TOTAL_PAUSE_NS: &str = "total_pause_ns";
pub const HEAP_BYTES: &str = "heap_bytes";

/// Extracts the metric map from one decoded snapshot.
pub fn derive(snapshot: &Frame) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    for band in &snapshot.children {
        match band.name.as_str() {
            BLOCKED_LABEL => {
                metrics.insert(BLOCKED_GOROUTINES.to_string(), band.value as f64);
            }
            GC_LABEL => {
                metrics.insert(GC_PAUSE_NS.to_string(), band.value as f64);
                metrics.insert(TOTAL_PAUSE_NS.to_string(), band.total() as f64);
            }
            HEAP_LABEL => {
                metrics.insert(HEAP_BYTES.to_string(), band.value as f64);
            }
            _ => {}
        }
    }
    metrics
}
