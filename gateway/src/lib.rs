//! Gateway: authenticated streaming ingest, bounded retention and
//! non-blocking fan-out to UI subscribers, plus alert evaluation over
//! metrics derived from each ingested chunk.

use thiserror::Error;

pub mod alerts;
pub mod auth;
pub mod config;
pub mod retention;
pub mod server;

pub use config::GatewayConfig;
pub use server::{Server, Subscription};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] protocol::WireError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("retention backend error: {0}")]
    Retention(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
