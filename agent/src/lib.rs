//! In-process profiling agent.
//!
//! A [`Collector`] owns one shared [`flamegraph::Builder`], a set of
//! samplers feeding it, and one or more exporters that ship periodic
//! snapshots to a gateway or to disk. Samplers observe the host runtime
//! through the source traits in [`runtime`], so embedders of managed
//! runtimes can wire their own probes while the provided process-level
//! sources cover the common case.

use thiserror::Error;

pub mod backoff;
pub mod collector;
pub mod exporter;
pub mod runtime;
pub mod sampler;

pub use collector::{Collector, CollectorConfig};
pub use exporter::{Encoder, Exporter};
pub use sampler::Sampler;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] protocol::WireError),
    #[error("flamegraph error: {0}")]
    Flamegraph(#[from] flamegraph::FlamegraphError),
    #[error("gateway rejected stream: {0}")]
    Rejected(String),
    #[error("exporter is closed")]
    Closed,
    #[error("invalid address: {0}")]
    InvalidAddr(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
