//! Time-bounded chunk retention for late-subscriber replay.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::Result;

/// Retention backends the gateway can run on.
///
/// Both variants share the contract: `write` detaches the bytes from the
/// caller, `read_all` yields copies ordered oldest→newest, and entries
/// outlive the retention window by at most one write cycle.
pub enum RetentionStore {
    InMemory(InMemStore),
    Shared(SharedStore),
}

impl RetentionStore {
    pub fn write(&self, chunk: &[u8]) -> Result<()> {
        match self {
            RetentionStore::InMemory(store) => {
                store.write(chunk);
                Ok(())
            }
            RetentionStore::Shared(store) => store.write(chunk),
        }
    }

    pub fn read_all(&self) -> Vec<Vec<u8>> {
        match self {
            RetentionStore::InMemory(store) => store.read_all(),
            RetentionStore::Shared(store) => store.read_all(),
        }
    }
}

struct Ring {
    slots: Vec<Option<(Vec<u8>, Instant)>>,
    idx: usize,
    filled: bool,
}

/// Circular buffer sized for the expected write rate over one retention
/// window. Append is O(1); expiry is lazy and rescans only when the ring
/// has wrapped onto an already-stale slot.
pub struct InMemStore {
    window: Duration,
    ring: Mutex<Ring>,
}

impl InMemStore {
    pub fn new(window: Duration) -> Self {
        Self::with_rate(window, 10)
    }

    /// `rate` is the expected number of writes per second.
    pub fn with_rate(window: Duration, rate: u32) -> Self {
        let window = window.max(Duration::from_secs(1));
        let capacity = (window.as_secs_f64() * rate.max(1) as f64).ceil() as usize + 1;
        InMemStore {
            window,
            ring: Mutex::new(Ring {
                slots: vec![None; capacity],
                idx: 0,
                filled: false,
            }),
        }
    }

    pub fn write(&self, chunk: &[u8]) {
        let now = Instant::now();
        let mut ring = self.ring.lock();

        let idx = ring.idx;
        ring.slots[idx] = Some((chunk.to_vec(), now));
        ring.idx = (idx + 1) % ring.slots.len();
        if ring.idx == 0 {
            ring.filled = true;
        }

        if !ring.filled {
            return;
        }
        // The slot about to be overwritten is the oldest; while it is still
        // inside the window nothing else can be stale.
        let cutoff = match now.checked_sub(self.window) {
            Some(cutoff) => cutoff,
            None => return,
        };
        let next = ring.idx;
        if let Some((_, ts)) = &ring.slots[next] {
            if *ts > cutoff {
                return;
            }
        }
        for slot in ring.slots.iter_mut() {
            if let Some((_, ts)) = slot {
                if *ts <= cutoff {
                    *slot = None;
                }
            }
        }
    }

    pub fn read_all(&self) -> Vec<Vec<u8>> {
        let ring = self.ring.lock();
        let mut out = Vec::new();
        let mut push = |slot: &Option<(Vec<u8>, Instant)>| {
            if let Some((bytes, _)) = slot {
                out.push(bytes.clone());
            }
        };
        if ring.filled {
            for slot in &ring.slots[ring.idx..] {
                push(slot);
            }
        }
        for slot in &ring.slots[..ring.idx] {
            push(slot);
        }
        out
    }
}

/// External capped-list backend (a distributed cache keyed by a fixed
/// identifier). Ordering inside the backend is newest-first; `read_all`
/// reverses to honour the chronological contract.
pub trait SharedBackend: Send + Sync {
    /// Prepends one chunk to the list.
    fn push(&self, chunk: &[u8]) -> Result<()>;
    /// Trims the list to at most `max_len` entries.
    fn trim(&self, max_len: usize) -> Result<()>;
    /// Refreshes the list's time-to-live.
    fn expire(&self, ttl: Duration) -> Result<()>;
    /// Returns the list newest-first.
    fn range(&self) -> Result<Vec<Vec<u8>>>;
}

pub struct SharedStore {
    backend: Box<dyn SharedBackend>,
    window: Duration,
    max_len: usize,
}

impl SharedStore {
    pub fn new(backend: Box<dyn SharedBackend>, window: Duration, rate: u32) -> Self {
        let window = window.max(Duration::from_secs(1));
        let max_len = (window.as_secs_f64() * rate.max(1) as f64) as usize + 100;
        SharedStore {
            backend,
            window,
            max_len,
        }
    }

    pub fn write(&self, chunk: &[u8]) -> Result<()> {
        self.backend.push(chunk)?;
        self.backend.trim(self.max_len)?;
        self.backend.expire(self.window)?;
        Ok(())
    }

    pub fn read_all(&self) -> Vec<Vec<u8>> {
        match self.backend.range() {
            Ok(mut chunks) => {
                chunks.reverse();
                chunks
            }
            Err(e) => {
                warn!(error = %e, "shared retention read failed");
                Vec::new()
            }
        }
    }
}
