//! Orchestrates samplers and exporters around one shared builder.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{select, Sender};
use flamegraph::Builder;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::exporter::Exporter;
use crate::sampler::Sampler;
use crate::Result;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Default sampling frequency offered to samplers that honour it.
    pub hz: u32,
    /// Snapshot-and-export cadence; zero disables the periodic loop and
    /// leaves exporting to [`Collector::trigger_export`].
    pub export_every: Duration,
    /// Display name of the root frame.
    pub root_name: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            hz: 1000,
            export_every: Duration::ZERO,
            root_name: "root".to_string(),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct State {
    phase: Phase,
    samplers: Vec<Box<dyn Sampler>>,
    quit: Option<Sender<()>>,
    export_loop: Option<JoinHandle<()>>,
}

/// Owns the builder, sampler lifecycles and exporter fan-out.
pub struct Collector {
    cfg: CollectorConfig,
    builder: Arc<Builder>,
    exporters: Arc<Mutex<Vec<Box<dyn Exporter + Send>>>>,
    state: Mutex<State>,
}

impl Collector {
    pub fn new(mut cfg: CollectorConfig) -> Self {
        if cfg.hz == 0 {
            cfg.hz = 1000;
        }
        if cfg.root_name.is_empty() {
            cfg.root_name = "root".to_string();
        }
        let builder = Arc::new(Builder::new(cfg.root_name.clone()));
        Collector {
            cfg,
            builder,
            exporters: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(State {
                phase: Phase::Idle,
                samplers: Vec::new(),
                quit: None,
                export_loop: None,
            }),
        }
    }

    /// The shared builder samplers feed into.
    pub fn builder(&self) -> Arc<Builder> {
        self.builder.clone()
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.cfg
    }

    /// Registers a sampler; if the collector is already running the sampler
    /// starts immediately. After `stop` this is a no-op.
    pub fn add_sampler(&self, mut sampler: Box<dyn Sampler>) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Stopped => {}
            Phase::Running => {
                sampler.start();
                state.samplers.push(sampler);
            }
            Phase::Idle => state.samplers.push(sampler),
        }
    }

    /// Registers an exporter. The same snapshot is offered to all exporters
    /// sequentially on each export.
    pub fn add_exporter(&self, exporter: Box<dyn Exporter + Send>) {
        self.exporters.lock().push(exporter);
    }

    /// Launches all registered samplers and, when configured, the periodic
    /// export loop. Idempotent; a stopped collector stays stopped.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            return;
        }
        state.phase = Phase::Running;

        for sampler in &mut state.samplers {
            sampler.start();
        }

        if self.cfg.export_every > Duration::ZERO {
            let (quit_tx, quit_rx) = crossbeam::channel::bounded(0);
            let builder = self.builder.clone();
            let exporters = self.exporters.clone();
            let every = self.cfg.export_every;
            let handle = std::thread::Builder::new()
                .name("export-loop".to_string())
                .spawn(move || {
                    let ticker = crossbeam::channel::tick(every);
                    loop {
                        select! {
                            recv(ticker) -> _ => {
                                if let Err(e) = push_snapshot(&builder, &exporters) {
                                    warn!(error = %e, "periodic export failed");
                                }
                            }
                            recv(quit_rx) -> _ => break,
                        }
                    }
                });
            match handle {
                Ok(handle) => {
                    state.quit = Some(quit_tx);
                    state.export_loop = Some(handle);
                }
                Err(e) => warn!(error = ?e, "failed to spawn export loop"),
            }
        }
    }

    /// Snapshots and exports once, returning the first exporter failure.
    /// Usable even when the periodic loop is disabled.
    pub fn trigger_export(&self) -> Result<()> {
        push_snapshot(&self.builder, &self.exporters)
    }

    /// Stops the export loop, all samplers (concurrently) and closes all
    /// exporters. Safe to call more than once.
    pub fn stop(&self) {
        let (samplers, export_loop) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            state.quit.take();
            (
                std::mem::take(&mut state.samplers),
                state.export_loop.take(),
            )
        };

        if let Some(handle) = export_loop {
            let _ = handle.join();
        }

        std::thread::scope(|scope| {
            for sampler in samplers {
                scope.spawn(move || {
                    let mut sampler = sampler;
                    sampler.stop();
                });
            }
        });

        for exporter in self.exporters.lock().iter_mut() {
            if let Err(e) = exporter.close() {
                debug!(error = %e, "exporter close failed");
            }
        }
    }
}

/// Grabs one snapshot and offers it to every exporter in registration
/// order. The first failure aborts the remaining fan-out for this tick;
/// exporters are not retried within one tick.
fn push_snapshot(
    builder: &Builder,
    exporters: &Mutex<Vec<Box<dyn Exporter + Send>>>,
) -> Result<()> {
    let snapshot = builder.snapshot_and_reset();
    for exporter in exporters.lock().iter_mut() {
        exporter.export(&snapshot)?;
    }
    Ok(())
}
