use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rpcproxy::config::{parse_token_map, Cli, RootConfig};
use rpcproxy::gateway::GatewayAssembly;
use rpcproxy::{metrics as proxy_metrics, server};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug,rpcproxy=debug" } else { "warn,rpcproxy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = match RootConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let raw_tokens = std::env::var("RPCPROXY_TOKENS").ok();
    let token_gate = match parse_token_map(raw_tokens.as_deref()) {
        Ok(Some(tokens)) => Some(rpcproxy::ratelimit::TokenGate::new(tokens)),
        Ok(None) => None,
        Err(err) => {
            eprintln!("invalid RPCPROXY_TOKENS: {err}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        port = config.port,
        metrics_port = config.metrics.port,
        gateways = config.gateways.len(),
        auth = token_gate.is_some(),
        verbose = cli.verbose,
        "starting rpcproxy"
    );

    let recorder = proxy_metrics::install_recorder();
    let metrics_cancel = CancellationToken::new();
    let metrics_task = tokio::spawn(proxy_metrics::serve(
        recorder,
        config.metrics.port,
        metrics_cancel.clone(),
    ));

    let probe_cancel = CancellationToken::new();
    let mut assemblies: Vec<GatewayAssembly> = config
        .gateways
        .iter()
        .cloned()
        .map(GatewayAssembly::new)
        .collect();
    for assembly in &mut assemblies {
        assembly.start(probe_cancel.clone());
    }

    let app = server::build_router(&assemblies, token_gate);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {addr}: {err}");
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, "rpcproxy listening");
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    probe_cancel.cancel();
    metrics_cancel.cancel();
    for assembly in &mut assemblies {
        assembly.stop(probe_cancel.clone()).await;
    }
    let _ = metrics_task.await;

    match serve_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
}
