use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Installs the process-wide Prometheus recorder and returns a handle whose
/// `render()` produces the text-exposition body served on `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Serves `/metrics` on its own listener, independent of the gateway
/// listener, matching the teacher's split between the RPC port and an
/// operational port.
pub async fn serve(handle: PrometheusHandle, port: u16, cancel: tokio_util::sync::CancellationToken) {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, %err, "failed to bind metrics listener");
            return;
        }
    };

    info!(%addr, "metrics listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .expect("metrics server error");
}
