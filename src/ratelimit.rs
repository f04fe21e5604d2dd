//! Front-door middleware: path-segment token authentication plus a
//! non-blocking per-token rate limiter, in the teacher's `token_rpc_handler`
//! style of pulling the token out of the URL rather than an Authorization
//! header.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use tracing::warn;

use crate::config::TokenMap;

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One bucket per configured token, built once at startup from the token map
/// and never resized afterward — a recognized token always has a bucket.
pub struct TokenGate {
    tokens: TokenMap,
    buckets: HashMap<String, Bucket>,
}

impl TokenGate {
    pub fn new(tokens: TokenMap) -> Self {
        let mut buckets = HashMap::with_capacity(tokens.len());
        for (token, record) in &tokens {
            let rate = NonZeroU32::new(record.num_of_request_per_sec).expect("validated at config load");
            buckets.insert(token.clone(), RateLimiter::direct(Quota::per_second(rate)));
        }
        Self { tokens, buckets }
    }

    fn check(&self, token: &str) -> GateOutcome {
        let Some(record) = self.tokens.get(token) else {
            return GateOutcome::Unauthorized;
        };
        let Some(bucket) = self.buckets.get(token) else {
            // Invariant violated: every configured token has a bucket built in `new`.
            return GateOutcome::Misconfigured;
        };
        if bucket.check().is_ok() {
            GateOutcome::Allowed { token_name: record.name.clone() }
        } else {
            GateOutcome::RateLimited { token_name: record.name.clone() }
        }
    }
}

enum GateOutcome {
    Allowed { token_name: String },
    Unauthorized,
    RateLimited { token_name: String },
    Misconfigured,
}

/// Identity resolved by the gate, attached to request extensions for
/// downstream logging/metrics. Absent when auth is disabled.
#[derive(Debug, Clone)]
pub struct TokenIdentity {
    pub name: String,
}

/// Strips the trailing `/{token}` segment from `path`, returning the
/// remaining prefix (with a leading slash, no trailing slash) and the token.
/// Returns `None` if `path` has fewer than two segments.
fn strip_token_segment(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 && trimmed.len() == 1 {
        return None;
    }
    let (prefix, rest) = trimmed.split_at(idx);
    let token = &rest[1..];
    if prefix.is_empty() || token.is_empty() {
        return None;
    }
    Some((prefix, token))
}

/// Axum middleware gating every request behind `TokenGate` when auth is
/// enabled. Rewrites the request URI to drop the trailing token segment
/// before handing off, so downstream routing matches on `pathPrefix` alone.
pub async fn token_gate(
    State(gate): State<Arc<Option<TokenGate>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(gate) = gate.as_ref() else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_string();
    let Some((prefix, token)) = strip_token_segment(&path) else {
        warn!(path = %redact_path(&path), "rejected: missing token segment");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    };

    match gate.check(token) {
        GateOutcome::Allowed { token_name } => {
            let mut parts = request.uri().clone().into_parts();
            let new_path = prefix.to_string();
            parts.path_and_query = Some(new_path.parse().expect("validated prefix is a valid path"));
            *request.uri_mut() = axum::http::Uri::from_parts(parts).expect("valid URI parts");
            request.extensions_mut().insert(TokenIdentity { name: token_name });
            next.run(request).await
        }
        GateOutcome::Unauthorized => {
            warn!(path = %redact_path(&path), "rejected: unknown token");
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
        GateOutcome::RateLimited { token_name } => {
            metrics::counter!("rpcproxy_rate_limit_reject_total", "token" => token_name).increment(1);
            warn!(path = %redact_path(&path), "rejected: rate limited");
            (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response()
        }
        GateOutcome::Misconfigured => {
            warn!(path = %redact_path(&path), "rejected: token recognized but has no bucket");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Replaces the trailing path segment with a placeholder so the raw token
/// value never reaches the log stream.
fn redact_path(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) if idx + 1 < path.len() => format!("{}/<redacted>", &path[..idx]),
        _ => path.to_string(),
    }
}
