//! Snapshot delivery to external sinks.

use flamegraph::Frame;

use crate::Result;

mod file;
mod stream;

pub use file::{FileConfig, FileExporter};
pub use stream::{StreamConfig, StreamExporter};

/// Delivers flamegraph snapshots to an external sink (gateway, file, ...).
pub trait Exporter {
    /// Ships one snapshot; errors are surfaced per call and the caller is
    /// expected to keep offering subsequent snapshots.
    fn export(&mut self, snapshot: &Frame) -> Result<()>;
    /// Releases resources; the exporter is unusable afterwards.
    fn close(&mut self) -> Result<()>;
}

/// Snapshot encodings offered on the wire and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoder {
    /// Plain UTF-8 JSON, the chunk format gateways fan out.
    #[default]
    Json,
    /// Gzip-wrapped JSON for disk recordings.
    GzipJson,
}

impl Encoder {
    pub fn encode(&self, snapshot: &Frame) -> Result<Vec<u8>> {
        match self {
            Encoder::Json => Ok(snapshot.to_json()?),
            Encoder::GzipJson => Ok(flamegraph::fgo::encode(snapshot, true)?),
        }
    }
}
