use std::fmt;

/// Errors raised by the proxy engine: health probes and upstream dispatch.
#[derive(Debug)]
pub enum ProxyError {
    /// Every candidate upstream failed for this request.
    AllUpstreamsFailed,
    /// Transport-level failure talking to an upstream.
    UpstreamRequest(String),
    /// Upstream returned a non-2xx status.
    UpstreamHttp(u16),
    /// Failed to serialize/deserialize JSON.
    Json(serde_json::Error),
    /// Failed to read a response body.
    BodyRead(String),
    /// Health probe failed (transport, parse, or malformed JSON-RPC).
    HealthProbe(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllUpstreamsFailed => write!(f, "all upstream backends failed"),
            Self::UpstreamRequest(e) => write!(f, "upstream request failed: {e}"),
            Self::UpstreamHttp(status) => write!(f, "upstream HTTP {status}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::BodyRead(e) => write!(f, "body read error: {e}"),
            Self::HealthProbe(e) => write!(f, "health probe failed: {e}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Errors raised while loading and validating the configuration document.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
    /// A config value failed validation (e.g. a non-positive duration, a
    /// duplicate gateway path prefix, an empty target list).
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {e}"),
            Self::Yaml(e) => write!(f, "invalid YAML config: {e}"),
            Self::Json(e) => write!(f, "invalid JSON config: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
