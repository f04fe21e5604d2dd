use std::time::Duration;

use tracing::debug;

use crate::error::ProxyError;
use crate::jsonrpc;

/// Capability an upstream exposes to the health checker: "ask it how far
/// along the chain it has seen". Only one implementation exists today
/// (HTTP + `eth_blockNumber`), but keeping this behind a trait means a
/// future upstream kind (WebSocket, REST) can plug in without the registry
/// or the prober caring how the number was obtained.
pub trait HealthCheck: Send + Sync + 'static {
    async fn probe(&self, client: &reqwest::Client, timeout: Duration) -> Result<u64, ProxyError>;
}

/// The only probe kind the proxy currently speaks: a JSON-RPC
/// `eth_blockNumber` call against the upstream's URL.
pub struct JsonRpcBlockNumberProbe {
    pub url: String,
}

impl HealthCheck for JsonRpcBlockNumberProbe {
    async fn probe(&self, client: &reqwest::Client, timeout: Duration) -> Result<u64, ProxyError> {
        let resp = client
            .post(&self.url)
            .timeout(timeout)
            .json(&jsonrpc::probe_request_body())
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamRequest(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProxyError::UpstreamHttp(resp.status().as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

        let block = jsonrpc::parse_block_number(&body)
            .ok_or_else(|| ProxyError::HealthProbe("missing or malformed result field".into()))?;

        debug!(url = %self.url, block, "probe succeeded");
        Ok(block)
    }
}
