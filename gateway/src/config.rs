use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

use crate::{GatewayError, Result};

/// Gateway server parameters.
///
/// Contradictory or unreadable settings are fatal: [`GatewayConfig::validate`]
/// runs before the server binds and aborts startup on failure.
#[derive(Debug, Clone, Builder)]
pub struct GatewayConfig {
    /// `host:port` to bind.
    #[builder(default = "127.0.0.1:4317".to_string())]
    pub listen_addr: String,
    /// How long a chunk stays replayable to late subscribers.
    #[builder(default = Duration::from_secs(15 * 60))]
    pub retention_window: Duration,
    /// Estimated chunk arrivals per second; sizes the retention ring.
    #[builder(default = 10)]
    pub expected_write_rate: u32,
    /// Soft cap on concurrent subscribers; beyond it new handles are
    /// immediately closed.
    #[builder(default = 128)]
    pub max_subscribers: usize,
    /// Pending-chunk capacity of one subscriber queue.
    #[builder(default = 256)]
    pub subscriber_queue: usize,
    /// Static bearer token; empty means no static auth.
    pub auth_token: Option<String>,
    /// HMAC secret for signed short-lived tokens; takes precedence over the
    /// static token when set.
    pub hmac_secret: Option<Vec<u8>>,
    /// Expected `iss` claim for signed tokens.
    pub issuer: Option<String>,
    /// TLS material for the fronting listener; both or neither. The files
    /// must exist and look like PEM at startup.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig::builder().build()
    }
}

impl GatewayConfig {
    /// Clamps tunables into their supported ranges.
    pub fn normalize(&mut self) {
        if self.retention_window < Duration::from_secs(60) {
            self.retention_window = Duration::from_secs(60);
        }
        if self.expected_write_rate == 0 {
            self.expected_write_rate = 10;
        }
        if self.subscriber_queue == 0 {
            self.subscriber_queue = 256;
        }
    }

    /// Startup checks that must abort serving when violated.
    pub fn validate(&self) -> Result<()> {
        match (&self.tls_cert, &self.tls_key) {
            (None, None) => {}
            (Some(_), None) | (None, Some(_)) => {
                return Err(GatewayError::Config(
                    "tls_cert and tls_key must be set together".to_string(),
                ));
            }
            (Some(cert), Some(key)) => {
                read_pem(cert)?;
                read_pem(key)?;
            }
        }
        if self.issuer.is_some() && self.hmac_secret.is_none() {
            return Err(GatewayError::Config(
                "issuer requires auth_hmac_secret".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_pem(path: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("unreadable TLS material {path:?}: {e}")))?;
    if !content.contains("-----BEGIN") {
        return Err(GatewayError::Config(format!(
            "{path:?} does not look like PEM"
        )));
    }
    Ok(())
}
