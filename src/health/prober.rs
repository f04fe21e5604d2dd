use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::probe::HealthCheck;
use super::registry::HealthRegistry;
use crate::config::GatewayConfig;

/// Drives one upstream's probe loop until `cancel` fires. Each upstream gets
/// its own task and its own ticker so a slow or hung probe on one upstream
/// never delays the others — `MissedTickBehavior::Skip` means a probe that
/// overruns its interval is simply skipped rather than queued up to fire in
/// a burst once it returns.
pub async fn run<C: HealthCheck>(
    idx: usize,
    gateway_name: String,
    registry: Arc<HealthRegistry>,
    checker: Arc<C>,
    client: reqwest::Client,
    gateway: GatewayConfig,
    cancel: CancellationToken,
) {
    let upstream_name = gateway.targets[idx].name.clone();
    let interval = Duration::from_secs(gateway.health_checks.interval);
    let timeout = Duration::from_secs(gateway.health_checks.timeout);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(gateway = %gateway_name, upstream = %upstream_name, "probe loop stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        match checker.probe(&client, timeout).await {
            Ok(block) => {
                metrics::gauge!("rpcproxy_upstream_block_number", "gateway" => gateway_name.clone(), "upstream" => upstream_name.clone()).set(block as f64);
                metrics::counter!("rpcproxy_health_probe_total", "gateway" => gateway_name.clone(), "upstream" => upstream_name.clone(), "result" => "success").increment(1);
                registry.record_success(idx, block).await;
            }
            Err(err) => {
                warn!(gateway = %gateway_name, upstream = %upstream_name, %err, "health probe failed");
                metrics::counter!("rpcproxy_health_probe_total", "gateway" => gateway_name.clone(), "upstream" => upstream_name.clone(), "result" => "failure").increment(1);
                registry.record_failure(idx).await;
            }
        }

        let snapshot = registry.snapshot().await;
        if let Some(state) = snapshot.get(idx) {
            metrics::gauge!("rpcproxy_upstream_healthy", "gateway" => gateway_name.clone(), "upstream" => upstream_name.clone())
                .set(if state.healthy { 1.0 } else { 0.0 });
        }
    }
}
