use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use rpcproxy::config::{GatewayConfig, HealthCheckConfig, TokenRecord, UpstreamConfig};
use rpcproxy::gateway::GatewayAssembly;
use rpcproxy::ratelimit::TokenGate;
use rpcproxy::server::build_router;

fn gateway_config(prefix: &str, targets: Vec<UpstreamConfig>) -> GatewayConfig {
    GatewayConfig {
        name: prefix.to_string(),
        path_prefix: prefix.to_string(),
        upstream_timeout: 5,
        health_checks: HealthCheckConfig {
            interval: 3600,
            timeout: 2,
            failure_threshold: 3,
            success_threshold: 1,
            lag_tolerance: 0,
        },
        targets,
    }
}

async fn seeded_assembly(prefix: &str, targets: Vec<UpstreamConfig>, block_numbers: &[u64]) -> GatewayAssembly {
    let assembly = GatewayAssembly::new(gateway_config(prefix, targets));
    for (idx, block) in block_numbers.iter().enumerate() {
        assembly.registry.record_success(idx, *block).await;
    }
    assembly
}

#[tokio::test]
async fn valid_token_single_healthy_upstream_returns_upstream_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#))
        .mount(&upstream)
        .await;

    let assembly = seeded_assembly(
        "eth",
        vec![UpstreamConfig { name: "primary".into(), url: upstream.uri() }],
        &[16],
    )
    .await;

    let mut tokens = HashMap::new();
    tokens.insert("tokA".to_string(), TokenRecord { name: "alice".into(), num_of_request_per_sec: 5 });
    let app = build_router(&[assembly], Some(TokenGate::new(tokens)));

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth/tokA")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#);

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, br#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#);
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&upstream).await;

    let assembly = seeded_assembly(
        "eth",
        vec![UpstreamConfig { name: "primary".into(), url: upstream.uri() }],
        &[16],
    )
    .await;

    let mut tokens = HashMap::new();
    tokens.insert("tokA".to_string(), TokenRecord { name: "alice".into(), num_of_request_per_sec: 5 });
    let app = build_router(&[assembly], Some(TokenGate::new(tokens)));

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth/wrong")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sixth_request_within_a_second_is_rate_limited() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#))
        .mount(&upstream)
        .await;

    let assembly = seeded_assembly(
        "eth",
        vec![UpstreamConfig { name: "primary".into(), url: upstream.uri() }],
        &[1],
    )
    .await;

    let mut tokens = HashMap::new();
    tokens.insert("tokA".to_string(), TokenRecord { name: "alice".into(), num_of_request_per_sec: 5 });
    let app = build_router(&[assembly], Some(TokenGate::new(tokens)));

    for _ in 0..5 {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/eth/tokA")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth/tokA")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth/tokA")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn failover_on_5xx_reaches_second_upstream() {
    let first = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).mount(&first).await;

    let second = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"jsonrpc":"2.0","id":1,"result":"0x2"}"#))
        .mount(&second)
        .await;

    let assembly = seeded_assembly(
        "eth",
        vec![
            UpstreamConfig { name: "first".into(), url: first.uri() },
            UpstreamConfig { name: "second".into(), url: second.uri() },
        ],
        &[2, 2],
    )
    .await;

    let app = build_router(&[assembly], None);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"jsonrpc":"2.0","id":1,"result":"0x2"}"#);
}

#[tokio::test]
async fn no_failover_on_4xx() {
    let first = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"bad"}"#))
        .mount(&first)
        .await;

    let second = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&second).await;

    let assembly = seeded_assembly(
        "eth",
        vec![
            UpstreamConfig { name: "first".into(), url: first.uri() },
            UpstreamConfig { name: "second".into(), url: second.uri() },
        ],
        &[2, 2],
    )
    .await;

    let app = build_router(&[assembly], None);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"error":"bad"}"#);
    assert_eq!(second.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn all_unhealthy_returns_503_without_contacting_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&upstream).await;

    // No record_success calls: upstream stays unhealthy from the default state.
    let assembly = GatewayAssembly::new(gateway_config(
        "eth",
        vec![UpstreamConfig { name: "primary".into(), url: upstream.uri() }],
    ));

    let app = build_router(&[assembly], None);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/eth")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn head_on_gateway_path_is_rejected_with_405() {
    let upstream = MockServer::start().await;
    let assembly = seeded_assembly(
        "eth",
        vec![UpstreamConfig { name: "primary".into(), url: upstream.uri() }],
        &[1],
    )
    .await;

    let app = build_router(&[assembly], None);

    let resp = app
        .oneshot(Request::builder().method("HEAD").uri("/eth").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn liveness_endpoint_is_always_reachable() {
    let assembly = GatewayAssembly::new(gateway_config("eth", vec![UpstreamConfig { name: "p".into(), url: "http://example.invalid".into() }]));
    let mut tokens = HashMap::new();
    tokens.insert("tokA".to_string(), TokenRecord { name: "alice".into(), num_of_request_per_sec: 5 });
    let app = build_router(&[assembly], Some(TokenGate::new(tokens)));

    let resp = app
        .oneshot(Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}
