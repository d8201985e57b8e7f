//! Gateway binary: ingest, retention, fan-out and alert evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use flamewire::config::GatewayFileConfig;
use gateway::Server;
use tracing::info;

#[derive(Parser)]
#[command(name = "flamewire-gateway")]
#[command(about = "flamegraph streaming gateway", long_about = None)]
struct Args {
    #[arg(help = "configuration file path (toml format)")]
    config: Option<String>,

    #[arg(short, long, help = "listen address, overrides the config file")]
    listen: Option<String>,
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
        Some(path) => GatewayFileConfig::load(path)
            .with_context(|| format!("failed to load config path={path}"))?,
        None => GatewayFileConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let engine = config.build_alert_engine()?;
    let server = Server::new(config.to_gateway_config(), engine)
        .context("gateway configuration rejected")?;
    server.serve().context("failed to start gateway")?;
    info!(rules = config.alerts.len(), "gateway running");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received ctrl+c, shutting down gateway");
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    server.shutdown();
    info!("gateway stopped");
    Ok(())
}
