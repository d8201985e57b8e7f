use std::path::PathBuf;
use std::time::Duration;

use gateway::alerts::{AlertEngine, Rule, Sink};
use serde::{Deserialize, Serialize};

/// Agent-side configuration (TOML).
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_root_name")]
    pub root_name: String,

    #[serde(default = "default_hz")]
    pub hz: u32,

    #[serde(default = "default_export_every_ms")]
    pub export_every_ms: u64,

    #[serde(default)]
    pub gateway: Option<GatewaySink>,

    #[serde(default)]
    pub file: Option<FileSink>,

    #[serde(default)]
    pub samplers: SamplerToggles,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            root_name: default_root_name(),
            hz: default_hz(),
            export_every_ms: default_export_every_ms(),
            gateway: None,
            file: None,
            samplers: SamplerToggles::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewaySink {
    pub addr: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileSink {
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SamplerToggles {
    #[serde(default = "default_true")]
    pub stack: bool,
    #[serde(default = "default_true")]
    pub heap: bool,
    #[serde(default = "default_true")]
    pub blocked: bool,
    #[serde(default = "default_heap_hz")]
    pub heap_hz: u32,
    #[serde(default = "default_blocked_hz")]
    pub blocked_hz: u32,
}

impl Default for SamplerToggles {
    fn default() -> Self {
        SamplerToggles {
            stack: true,
            heap: true,
            blocked: true,
            heap_hz: default_heap_hz(),
            blocked_hz: default_blocked_hz(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn export_every(&self) -> Duration {
        Duration::from_millis(self.export_every_ms)
    }
}

/// Gateway-side configuration (TOML).
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_write_rate")]
    pub expected_write_rate: u32,

    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub hmac_secret: Option<String>,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub tls_cert: Option<PathBuf>,

    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    #[serde(default)]
    pub alerts: Vec<AlertRuleConfig>,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        GatewayFileConfig {
            listen: default_listen(),
            retention_secs: default_retention_secs(),
            expected_write_rate: default_write_rate(),
            max_subscribers: default_max_subscribers(),
            subscriber_queue: default_subscriber_queue(),
            auth_token: None,
            hmac_secret: None,
            issuer: None,
            tls_cert: None,
            tls_key: None,
            alerts: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub name: String,
    pub expr: String,
    /// Stabilization window in milliseconds before the rule may fire.
    #[serde(default, rename = "for_ms")]
    pub for_ms: u64,
    #[serde(default = "default_sinks")]
    pub sinks: Vec<String>,
}

impl GatewayFileConfig {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_gateway_config(&self) -> gateway::GatewayConfig {
        gateway::GatewayConfig::builder()
            .listen_addr(self.listen.clone())
            .retention_window(Duration::from_secs(self.retention_secs))
            .expected_write_rate(self.expected_write_rate)
            .max_subscribers(self.max_subscribers)
            .subscriber_queue(self.subscriber_queue)
            .maybe_auth_token(self.auth_token.clone())
            .maybe_hmac_secret(self.hmac_secret.as_ref().map(|s| s.as_bytes().to_vec()))
            .maybe_issuer(self.issuer.clone())
            .maybe_tls_cert(self.tls_cert.clone())
            .maybe_tls_key(self.tls_key.clone())
            .build()
    }

    pub fn build_alert_engine(&self) -> eyre::Result<AlertEngine> {
        let mut engine = AlertEngine::new();
        for rule in &self.alerts {
            let mut sinks = Vec::new();
            for sink in &rule.sinks {
                match sink.as_str() {
                    "log" => sinks.push(Sink::Log),
                    other => eyre::bail!("unknown sink `{other}` in rule `{}`", rule.name),
                }
            }
            let compiled = Rule::new(
                rule.name.clone(),
                &rule.expr,
                Duration::from_millis(rule.for_ms),
                sinks,
            )
            .map_err(|e| eyre::eyre!("rule `{}`: {e}", rule.name))?;
            engine.add_rule(compiled);
        }
        Ok(engine)
    }
}

fn default_root_name() -> String {
    "root".to_string()
}

fn default_hz() -> u32 {
    100
}

fn default_export_every_ms() -> u64 {
    500
}

fn default_prefix() -> String {
    "flare".to_string()
}

fn default_true() -> bool {
    true
}

fn default_heap_hz() -> u32 {
    2
}

fn default_blocked_hz() -> u32 {
    50
}

fn default_listen() -> String {
    "127.0.0.1:4317".to_string()
}

fn default_retention_secs() -> u64 {
    15 * 60
}

fn default_write_rate() -> u32 {
    10
}

fn default_max_subscribers() -> usize {
    128
}

fn default_subscriber_queue() -> usize {
    256
}

fn default_sinks() -> Vec<String> {
    vec!["log".to_string()]
}
