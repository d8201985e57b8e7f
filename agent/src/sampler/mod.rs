//! Periodic samplers feeding the shared flamegraph builder.
//!
//! All samplers share one lifecycle: `start` launches a background thread
//! ticking at a clamped frequency, `stop` signals it and blocks until the
//! thread drains. A stopped sampler is terminal; construct a fresh instance
//! instead of restarting.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use tracing::error;

mod blocked;
mod gc;
mod heap;
mod stack;

pub use blocked::BlockedSampler;
pub use gc::GcSampler;
pub use heap::HeapSampler;
pub use stack::{StackSampler, StackSamplerConfig, DEFAULT_DROP_FRAMES};

/// Minimal contract any runtime sampler satisfies for the collector.
pub trait Sampler: Send {
    /// Launches the background loop. Subsequent calls are no-ops, as are
    /// calls after `stop`.
    fn start(&mut self);
    /// Signals termination and waits for the loop to drain. Terminal.
    fn stop(&mut self);
}

/// Shared start/stop plumbing: a quit channel whose sender side is dropped
/// on stop, and the join handle of the loop thread.
pub(crate) struct SamplerTask {
    quit: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl SamplerTask {
    pub(crate) fn new() -> Self {
        SamplerTask {
            quit: None,
            handle: None,
            stopped: false,
        }
    }

    pub(crate) fn running(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn launch<F>(&mut self, name: &str, body: F)
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        if self.stopped || self.handle.is_some() {
            return;
        }
        let (quit_tx, quit_rx) = crossbeam::channel::bounded(0);
        match std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(quit_rx))
        {
            Ok(handle) => {
                self.quit = Some(quit_tx);
                self.handle = Some(handle);
            }
            Err(e) => {
                error!(error = ?e, sampler = name, "failed to spawn sampler thread");
                self.stopped = true;
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        self.stopped = true;
        self.quit.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Tick interval for a clamped frequency.
pub(crate) fn interval(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::select;

    #[test]
    fn shutdown_joins_and_is_terminal() {
        let mut task = SamplerTask::new();
        task.launch("test-loop", |quit| {
            let ticker = crossbeam::channel::tick(Duration::from_millis(1));
            loop {
                select! {
                    recv(ticker) -> _ => {}
                    recv(quit) -> _ => break,
                }
            }
        });
        assert!(task.running());
        task.shutdown();
        assert!(!task.running());

        // Terminal: relaunching after shutdown must not spawn.
        task.launch("test-loop", |_quit| {});
        assert!(!task.running());
    }

    #[test]
    fn launch_twice_is_idempotent() {
        let mut task = SamplerTask::new();
        task.launch("first", |quit| {
            let _ = quit.recv();
        });
        let before = task.running();
        task.launch("second", |_quit| {});
        assert!(before && task.running());
        task.shutdown();
    }
}
