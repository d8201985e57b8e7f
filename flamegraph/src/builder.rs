use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::Frame;

/// One observation captured by a sampler.
///
/// `stack` is the root→leaf list of frame labels; `weight` is the numeric
/// cost (nanoseconds, bytes, count) and may be negative for deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub stack: Vec<String>,
    pub weight: i64,
}

impl Sample {
    pub fn new(stack: Vec<String>, weight: i64) -> Self {
        Sample { stack, weight }
    }
}

/// Mutable node of the live tree. Values are atomics and the child map has
/// its own lock, so many sampler threads can descend and insert concurrently
/// without a global lock.
struct LiveNode {
    name: String,
    value: AtomicI64,
    children: Mutex<HashMap<String, Arc<LiveNode>>>,
}

impl LiveNode {
    fn new(name: String) -> Self {
        LiveNode {
            name,
            value: AtomicI64::new(0),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn freeze(&self) -> Frame {
        let mut children: Vec<Frame> = {
            let guard = self.children.lock();
            guard.values().map(|c| c.freeze()).collect()
        };
        children.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
        Frame {
            name: self.name.clone(),
            value: self.value.load(Ordering::Relaxed),
            children,
        }
    }
}

/// Concurrent aggregator of [`Sample`]s into a live flamegraph tree.
///
/// The root pointer is the only shared mutable piece. `add` holds the root
/// lock in read mode for the duration of one merge, so any number of sampler
/// threads proceed in parallel against per-node locks; `snapshot_and_reset`
/// takes the write lock only for the pointer swap, which waits out in-flight
/// merges and guarantees every sample lands in exactly one snapshot. The
/// deep copy happens after the exclusive section.
pub struct Builder {
    root: RwLock<Arc<LiveNode>>,
}

impl Builder {
    pub fn new(root_name: impl Into<String>) -> Self {
        Builder {
            root: RwLock::new(Arc::new(LiveNode::new(root_name.into()))),
        }
    }

    /// Merges one sample into the live tree; safe for concurrent callers.
    /// Empty stacks and zero weights are no-ops. The root's own value is
    /// never mutated.
    pub fn add(&self, sample: Sample) {
        if sample.stack.is_empty() || sample.weight == 0 {
            return;
        }
        let root = self.root.read();
        let mut node: Arc<LiveNode> = Arc::clone(&root);
        for name in sample.stack {
            let child = {
                let mut children = node.children.lock();
                children
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(LiveNode::new(name)))
                    .clone()
            };
            child.value.fetch_add(sample.weight, Ordering::Relaxed);
            node = child;
        }
    }

    /// Swaps the live root for a fresh one carrying the same label and
    /// returns an immutable, value-ordered snapshot of the old tree.
    pub fn snapshot_and_reset(&self) -> Frame {
        let old = {
            let mut root = self.root.write();
            let fresh = Arc::new(LiveNode::new(root.name.clone()));
            std::mem::replace(&mut *root, fresh)
        };
        old.freeze()
    }

    /// Discards all accumulated samples, keeping the root label.
    pub fn reset(&self) {
        let mut root = self.root.write();
        let fresh = Arc::new(LiveNode::new(root.name.clone()));
        *root = fresh;
    }

    /// Display label of the root frame.
    pub fn root_name(&self) -> String {
        self.root.read().name.clone()
    }
}
