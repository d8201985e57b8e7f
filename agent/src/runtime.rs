//! Source traits through which samplers observe the profiled runtime.
//!
//! The agent never talks to a concrete runtime directly: each sampler pulls
//! from one of these traits, so an embedder hosting a managed runtime wires
//! its own probes while the process-level implementations below cover
//! self-profiling. All sources are polled from the sampler's own thread.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Number of recent pause slots a [`GcSource`] retains. The cycle counter
/// indexes into this ring modulo its length, so wrap-around is harmless.
pub const GC_PAUSE_SLOTS: usize = 256;

/// Cumulative garbage-collection state as of one poll.
#[derive(Clone)]
pub struct GcStats {
    /// Monotonic cycle counter; wraps at `u32::MAX`.
    pub count: u32,
    /// Ring of recent pause durations in nanoseconds; the pause of cycle
    /// `n` lives at index `(n - 1) % GC_PAUSE_SLOTS`.
    pub pause_ns: [u64; GC_PAUSE_SLOTS],
}

impl Default for GcStats {
    fn default() -> Self {
        GcStats {
            count: 0,
            pause_ns: [0; GC_PAUSE_SLOTS],
        }
    }
}

/// Scheduler occupancy as of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: i64,
    pub running: i64,
}

/// Yields the call stacks of all live execution contexts, each ordered
/// leaf→root with raw (untrimmed) symbol names.
pub trait StackSource: Send {
    fn capture(&mut self) -> Vec<Vec<String>>;
}

/// Yields cumulative GC activity.
pub trait GcSource: Send {
    fn read(&mut self) -> GcStats;
}

/// Yields the current live heap size in bytes.
pub trait HeapSource: Send {
    fn heap_bytes(&mut self) -> u64;
}

/// Yields task totals for the blocked-count heuristic.
pub trait TaskSource: Send {
    fn counts(&mut self) -> TaskCounts;
}

/// Cooperative stack registry for self-profiling.
///
/// Worker threads obtain a [`StackRecorder`] and call [`StackRecorder::record`]
/// at convenient points; the registry then serves the latest stack of every
/// registered context to the stack sampler. Dropping a recorder removes its
/// slot.
#[derive(Clone, Default)]
pub struct StackRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    slots: Mutex<HashMap<u64, Arc<Mutex<Vec<String>>>>>,
    next_id: AtomicU64,
}

pub struct StackRecorder {
    id: u64,
    slot: Arc<Mutex<Vec<String>>>,
    registry: Arc<RegistryInner>,
}

impl StackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> StackRecorder {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Mutex::new(Vec::new()));
        self.inner.slots.lock().insert(id, slot.clone());
        StackRecorder {
            id,
            slot,
            registry: self.inner.clone(),
        }
    }
}

impl StackRecorder {
    /// Captures the calling thread's stack into this recorder's slot,
    /// leaf-first, resolving symbol names where debug info permits.
    pub fn record(&self) {
        let mut names = Vec::new();
        backtrace::trace(|frame| {
            backtrace::resolve_frame(frame, |symbol| {
                if let Some(name) = symbol.name() {
                    names.push(name.to_string());
                }
            });
            names.len() < 128
        });
        *self.slot.lock() = names;
    }
}

impl Drop for StackRecorder {
    fn drop(&mut self) {
        self.registry.slots.lock().remove(&self.id);
    }
}

impl StackSource for StackRegistry {
    fn capture(&mut self) -> Vec<Vec<String>> {
        self.inner
            .slots
            .lock()
            .values()
            .map(|slot| slot.lock().clone())
            .collect()
    }
}

/// Heap size read from `/proc/self/statm` (data segment pages).
pub struct ProcHeapSource {
    page_size: u64,
    last: u64,
}

impl ProcHeapSource {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        ProcHeapSource {
            page_size: page_size.max(1) as u64,
            last: 0,
        }
    }

    fn read(&self) -> Option<u64> {
        let statm = fs::read_to_string("/proc/self/statm").ok()?;
        let data_pages: u64 = statm.split_whitespace().nth(5)?.parse().ok()?;
        Some(data_pages * self.page_size)
    }
}

impl Default for ProcHeapSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapSource for ProcHeapSource {
    fn heap_bytes(&mut self) -> u64 {
        match self.read() {
            Some(bytes) => {
                self.last = bytes;
                bytes
            }
            None => {
                debug!("failed to read /proc/self/statm");
                self.last
            }
        }
    }
}

/// Task counts scanned from `/proc/self/task`.
#[derive(Default)]
pub struct ProcTaskSource;

impl ProcTaskSource {
    pub fn new() -> Self {
        ProcTaskSource
    }
}

impl TaskSource for ProcTaskSource {
    fn counts(&mut self) -> TaskCounts {
        let entries = match fs::read_dir("/proc/self/task") {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = ?e, "failed to read /proc/self/task");
                return TaskCounts::default();
            }
        };

        let mut counts = TaskCounts::default();
        for entry in entries.flatten() {
            let stat = match fs::read_to_string(entry.path().join("stat")) {
                Ok(stat) => stat,
                Err(_) => continue,
            };
            // State is the first field after the parenthesized comm, which
            // itself may contain spaces and parens.
            let state = stat
                .rfind(')')
                .and_then(|idx| stat[idx + 1..].trim_start().chars().next());
            if let Some(state) = state {
                counts.total += 1;
                if state == 'R' {
                    counts.running += 1;
                }
            }
        }
        counts
    }
}
