use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use tracing::{info, warn};

use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::health::HealthRegistry;

/// Upper bound on any single request or response body buffered for replay,
/// per the body-replay note in §9: streaming bodies are unsupported and
/// buffering must be size-bounded, not unbounded.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that must never be forwarded to an upstream regardless of what
/// the client sent, per hop-by-hop semantics.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

pub struct DispatchOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DispatchOutcome {
    fn proxy_error(status: StatusCode, message: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: message.into() }
    }
}

/// Chooses a healthy upstream, forwards the request, and fails over on
/// retry-eligible outcomes. Holds no state of its own beyond the HTTP
/// client and gateway name — all health bookkeeping lives in the registry.
pub struct Dispatcher {
    gateway_name: String,
    client: reqwest::Client,
    registry: std::sync::Arc<HealthRegistry>,
    upstream_timeout: Duration,
}

impl Dispatcher {
    pub fn new(gateway_name: String, registry: std::sync::Arc<HealthRegistry>, upstream_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(20)
            .build()
            .expect("failed to build HTTP client");
        Self { gateway_name, client, registry, upstream_timeout }
    }

    pub async fn dispatch(&self, method: Method, headers: HeaderMap, body: Bytes, token_name: Option<&str>) -> DispatchOutcome {
        let candidates = self.registry.ordered_healthy().await;
        if candidates.is_empty() {
            warn!(gateway = %self.gateway_name, "no healthy upstream, returning 503");
            return DispatchOutcome::proxy_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "no healthy upstream available",
            );
        }

        let forward_headers = sanitize_headers(&headers);
        let token_label = token_name.unwrap_or("none").to_string();

        for upstream in &candidates {
            let start = Instant::now();
            match self.attempt(upstream, &method, &forward_headers, body.clone()).await {
                Attempt::Terminal(outcome) => {
                    self.emit_metrics(upstream, &token_label, outcome.status, start.elapsed());
                    return outcome;
                }
                Attempt::RetryEligible(status_for_metrics) => {
                    self.emit_metrics(upstream, &token_label, status_for_metrics, start.elapsed());
                    metrics::counter!("rpcproxy_failover_total", "gateway" => self.gateway_name.clone(), "upstream" => upstream.name.clone()).increment(1);
                    warn!(gateway = %self.gateway_name, upstream = %upstream.name, "retry-eligible failure, trying next candidate");
                    continue;
                }
            }
        }

        let err = ProxyError::AllUpstreamsFailed;
        warn!(gateway = %self.gateway_name, %err, "returning 502");
        DispatchOutcome::proxy_error(StatusCode::BAD_GATEWAY, err.to_string())
    }

    async fn attempt(
        &self,
        upstream: &UpstreamConfig,
        method: &Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Attempt {
        let request = self
            .client
            .request(method.clone(), &upstream.url)
            .headers(headers.clone())
            .timeout(self.upstream_timeout)
            .body(body);

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(upstream = %upstream.name, %err, "upstream request failed");
                return Attempt::RetryEligible(StatusCode::BAD_GATEWAY);
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return Attempt::RetryEligible(status);
        }

        let resp_headers = response.headers().clone();
        let resp_body = match read_bounded(response, MAX_BODY_BYTES).await {
            Ok(b) => b,
            Err(BoundedReadError::TooLarge) => {
                warn!(upstream = %upstream.name, limit = MAX_BODY_BYTES, "upstream response exceeded body size limit");
                return Attempt::RetryEligible(StatusCode::BAD_GATEWAY);
            }
            Err(BoundedReadError::Transport(err)) => {
                warn!(upstream = %upstream.name, %err, "failed reading upstream body");
                return Attempt::RetryEligible(StatusCode::BAD_GATEWAY);
            }
        };

        if resp_body.is_empty() && status.is_success() {
            return Attempt::RetryEligible(status);
        }

        info!(upstream = %upstream.name, status = %status.as_u16(), "dispatched");
        Attempt::Terminal(DispatchOutcome {
            status,
            headers: sanitize_headers(&resp_headers),
            body: resp_body,
        })
    }

    fn emit_metrics(&self, upstream: &UpstreamConfig, token_name: &str, status: StatusCode, latency: Duration) {
        metrics::counter!(
            "rpcproxy_requests_total",
            "gateway" => self.gateway_name.clone(),
            "upstream" => upstream.name.clone(),
            "token" => token_name.to_string(),
            "status" => status.as_u16().to_string(),
        ).increment(1);
        metrics::histogram!(
            "rpcproxy_upstream_latency_seconds",
            "gateway" => self.gateway_name.clone(),
            "upstream" => upstream.name.clone(),
        ).record(latency.as_secs_f64());
    }
}

enum Attempt {
    Terminal(DispatchOutcome),
    RetryEligible(StatusCode),
}

enum BoundedReadError {
    TooLarge,
    Transport(reqwest::Error),
}

/// Reads a response body chunk-by-chunk, aborting as soon as the
/// accumulated size would exceed `limit` rather than buffering the whole
/// thing first — a `Content-Length` lie or a chunked body with no length
/// header must not be able to exhaust memory.
async fn read_bounded(mut response: reqwest::Response, limit: usize) -> Result<Bytes, BoundedReadError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(BoundedReadError::TooLarge);
        }
    }

    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(BoundedReadError::Transport)? {
        if buf.len() + chunk.len() > limit {
            return Err(BoundedReadError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
