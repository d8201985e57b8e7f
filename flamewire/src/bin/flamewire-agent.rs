//! Standalone demo agent: samples its own process and streams snapshots to
//! a gateway and/or a directory. A handful of worker threads provide load
//! and cooperative stack recordings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use agent::exporter::{FileConfig, FileExporter, StreamConfig, StreamExporter};
use agent::runtime::{ProcHeapSource, ProcTaskSource, StackRecorder, StackRegistry};
use agent::sampler::{BlockedSampler, HeapSampler, StackSampler, StackSamplerConfig};
use agent::{Collector, CollectorConfig};
use clap::Parser;
use eyre::{Context, Result};
use flamewire::config::AgentConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "flamewire-agent")]
#[command(about = "self-profiling agent streaming live flamegraphs", long_about = None)]
struct Args {
    #[arg(help = "configuration file path (toml format)")]
    config: Option<String>,

    #[arg(short, long, help = "gateway address, overrides the config file")]
    gateway: Option<String>,

    #[arg(
        short,
        long,
        value_parser = humantime::parse_duration,
        help = "duration to run (e.g. 30s, 5m); default is until ctrl+c"
    )]
    duration: Option<Duration>,

    #[arg(long, default_value = "4", help = "demo worker threads")]
    workers: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("failed to load config path={path}"))?,
        None => AgentConfig::default(),
    };
    if let Some(addr) = args.gateway {
        config.gateway = Some(flamewire::config::GatewaySink {
            addr,
            auth_token: None,
        });
    }

    let collector = Collector::new(CollectorConfig {
        hz: config.hz,
        export_every: config.export_every(),
        root_name: config.root_name.clone(),
    });

    let registry = StackRegistry::new();
    if config.samplers.stack {
        collector.add_sampler(Box::new(StackSampler::new(
            collector.builder(),
            registry.clone(),
            StackSamplerConfig {
                hz: config.hz,
                ..Default::default()
            },
        )));
    }
    if config.samplers.heap {
        collector.add_sampler(Box::new(HeapSampler::new(
            collector.builder(),
            ProcHeapSource::new(),
            config.samplers.heap_hz,
        )));
    }
    if config.samplers.blocked {
        collector.add_sampler(Box::new(BlockedSampler::new(
            collector.builder(),
            ProcTaskSource::new(),
            config.samplers.blocked_hz,
        )));
    }

    if let Some(sink) = &config.gateway {
        let exporter = StreamExporter::connect(
            StreamConfig::builder()
                .addr(sink.addr.clone())
                .maybe_auth_token(sink.auth_token.clone())
                .build(),
        )
        .with_context(|| format!("failed to connect to gateway addr={}", sink.addr))?;
        collector.add_exporter(Box::new(exporter));
        info!(addr = %sink.addr, "streaming to gateway");
    }
    if let Some(sink) = &config.file {
        let exporter = FileExporter::new(
            FileConfig::builder()
                .dir(sink.dir.clone())
                .prefix(sink.prefix.clone())
                .compress(sink.compress)
                .sync(sink.sync)
                .build(),
        )?;
        collector.add_exporter(Box::new(exporter));
        info!(dir = %sink.dir.display(), "writing snapshots to disk");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received ctrl+c, shutting down agent");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut workers = Vec::new();
    for id in 0..args.workers {
        let recorder = registry.register();
        let running = running.clone();
        workers.push(
            thread::Builder::new()
                .name(format!("demo-worker-{id}"))
                .spawn(move || worker(id, recorder, running))?,
        );
    }

    collector.start();
    info!(hz = config.hz, workers = args.workers, "agent started");

    let deadline = args.duration.map(|d| std::time::Instant::now() + d);
    while running.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                info!("duration elapsed, shutting down agent");
                break;
            }
        }
        thread::sleep(Duration::from_millis(100));
    }

    running.store(false, Ordering::SeqCst);
    for handle in workers {
        let _ = handle.join();
    }
    collector.stop();
    info!("agent stopped");
    Ok(())
}

/// Demo workload: spin, record the stack, nap.
fn worker(id: usize, recorder: StackRecorder, running: Arc<AtomicBool>) {
    let mut acc = 0u64;
    while running.load(Ordering::SeqCst) {
        acc = crunch(acc, id as u64);
        recorder.record();
        let nap = if id % 3 == 0 { 40 } else { 10 };
        thread::sleep(Duration::from_millis(nap));
    }
    std::hint::black_box(acc);
}

#[inline(never)]
fn crunch(mut acc: u64, salt: u64) -> u64 {
    for i in 0..200_000u64 {
        acc = acc.wrapping_add((i ^ salt) % 7);
    }
    acc
}
