use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

/// Command-line entry point. Most configuration lives in the YAML/JSON
/// document pointed at by `--config`; the flags here only affect how the
/// process itself starts up.
#[derive(Parser, Debug, Clone)]
#[command(name = "rpcproxy", about = "Failover JSON-RPC reverse proxy")]
pub struct Cli {
    /// Path to the gateway configuration document (YAML or JSON, picked by extension).
    #[arg(long, env = "RPCPROXY_CONFIG", default_value = "config.yml")]
    pub config: PathBuf,

    /// Enable verbose logging: debug level for this crate, info for its dependencies.
    /// When off, only warnings and above are logged.
    #[arg(short, long, env = "RPCPROXY_VERBOSE", default_value = "false")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Probe period, in seconds.
    pub interval: u64,
    /// Per-probe timeout, in seconds.
    pub timeout: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Blocks a healthy upstream may lag behind the most advanced healthy
    /// peer before it is excluded from `ordered_healthy()`. Default 0 (tip only).
    #[serde(default)]
    pub lag_tolerance: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub name: String,
    pub path_prefix: String,
    /// Per-attempt upstream timeout, in seconds.
    pub upstream_timeout: u64,
    pub health_checks: HealthCheckConfig,
    pub targets: Vec<UpstreamConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    pub port: u16,
    pub metrics: MetricsConfig,
    pub gateways: Vec<GatewayConfig>,
}

impl RootConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str::<RootConfig>(&raw)?,
            _ => serde_yaml::from_str::<RootConfig>(&raw)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateways.is_empty() {
            return Err(ConfigError::Invalid("no gateways configured".into()));
        }

        let mut seen_prefixes = HashSet::new();
        for gw in &self.gateways {
            if gw.targets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "gateway '{}' has no targets",
                    gw.name
                )));
            }
            if gw.path_prefix.is_empty() || gw.path_prefix.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "gateway '{}' has an invalid pathPrefix {:?}",
                    gw.name, gw.path_prefix
                )));
            }
            if !seen_prefixes.insert(gw.path_prefix.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate gateway pathPrefix {:?}",
                    gw.path_prefix
                )));
            }
            if gw.upstream_timeout == 0 {
                return Err(ConfigError::Invalid(format!(
                    "gateway '{}' upstreamTimeout must be positive",
                    gw.name
                )));
            }
            let hc = &gw.health_checks;
            if hc.interval == 0 || hc.timeout == 0 {
                return Err(ConfigError::Invalid(format!(
                    "gateway '{}' healthChecks interval/timeout must be positive",
                    gw.name
                )));
            }
            if hc.failure_threshold == 0 || hc.success_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "gateway '{}' healthChecks thresholds must be >= 1",
                    gw.name
                )));
            }

            let mut seen_names = HashSet::new();
            for target in &gw.targets {
                if !seen_names.insert(target.name.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "gateway '{}' has duplicate upstream name {:?}",
                        gw.name, target.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// One authorized token's identity and rate limit, as carried in the
/// `{token: {name, numOfRequestPerSec}}` document supplied out-of-band via
/// an environment variable (never in the YAML/JSON config file).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub name: String,
    pub num_of_request_per_sec: u32,
}

pub type TokenMap = HashMap<String, TokenRecord>;

/// Parses the token map from the raw JSON document found in an environment
/// variable. Returns `Ok(None)` when `raw` is `None` (auth disabled).
pub fn parse_token_map(raw: Option<&str>) -> Result<Option<TokenMap>, ConfigError> {
    let Some(raw) = raw else { return Ok(None) };
    let map: TokenMap = serde_json::from_str(raw)?;
    for (token, record) in &map {
        if record.num_of_request_per_sec == 0 {
            return Err(ConfigError::Invalid(format!(
                "token {:?} (name {:?}) has a non-positive rate limit",
                token, record.name
            )));
        }
    }
    Ok(Some(map))
}
