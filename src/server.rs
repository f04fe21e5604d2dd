use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::dispatcher::MAX_BODY_BYTES;
use crate::gateway::GatewayAssembly;
use crate::ratelimit::{self, TokenGate, TokenIdentity};

#[derive(Clone)]
struct GatewayState {
    dispatcher: Arc<crate::dispatcher::Dispatcher>,
}

/// Hosts every configured gateway on one HTTP listener behind a shared
/// middleware chain: request tracing, panic recovery, liveness, and — when
/// a token map is configured — the token gate.
pub fn build_router(assemblies: &[GatewayAssembly], token_gate: Option<TokenGate>) -> Router {
    let mut gateway_router = Router::new();
    for assembly in assemblies {
        let state = GatewayState { dispatcher: assembly.dispatcher.clone() };
        let path = format!("/{}", assembly.config.path_prefix);
        gateway_router = gateway_router.route(&path, post(dispatch_handler).with_state(state));
    }

    // The token gate only applies to gateway paths — `/health` has no token
    // segment and must stay reachable regardless of auth configuration.
    let gate_state = Arc::new(token_gate);
    let gateway_router = gateway_router
        .layer(middleware::from_fn_with_state(gate_state, ratelimit::token_gate))
        // Rejects with 413 before the body ever reaches the dispatcher's
        // replay buffer — streaming bodies are unsupported (§9) and the
        // buffer itself must be size-bounded.
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(gateway_router)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn dispatch_handler(
    State(state): State<GatewayState>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let token_name = parts.extensions.get::<TokenIdentity>().map(|t| t.name.clone());
    // `RequestBodyLimitLayer` (installed in `build_router`) has already
    // rejected anything over `MAX_BODY_BYTES` with a 413 before this runs;
    // this cap is belt-and-suspenders against the replay buffer growing
    // unbounded if that layer is ever removed.
    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };

    let outcome = state
        .dispatcher
        .dispatch(parts.method, parts.headers, body_bytes, token_name.as_deref())
        .await;

    let mut response = Response::builder().status(outcome.status);
    if let Some(headers) = response.headers_mut() {
        *headers = outcome.headers;
    }
    response.body(Body::from(outcome.body)).expect("valid response")
}
