use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::health::{self, HealthRegistry, JsonRpcBlockNumberProbe};

/// Everything needed to serve one named chain: its health registry, the
/// background probes that feed it, and the dispatcher that consults it.
/// Owns its probes exclusively — no other assembly ever touches them.
pub struct GatewayAssembly {
    pub config: GatewayConfig,
    pub registry: Arc<HealthRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    probe_client: reqwest::Client,
    probe_handles: Vec<JoinHandle<()>>,
}

impl GatewayAssembly {
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(HealthRegistry::new(&config));
        let dispatcher = Arc::new(Dispatcher::new(
            config.name.clone(),
            registry.clone(),
            Duration::from_secs(config.upstream_timeout),
        ));
        let probe_client = reqwest::Client::builder()
            .build()
            .expect("failed to build health-check HTTP client");

        Self { config, registry, dispatcher, probe_client, probe_handles: Vec::new() }
    }

    /// Launches one background probe task per upstream, all bound to `cancel`.
    pub fn start(&mut self, cancel: CancellationToken) {
        info!(gateway = %self.config.name, upstreams = self.config.targets.len(), "starting health probes");
        for idx in 0..self.config.targets.len() {
            let probe = Arc::new(JsonRpcBlockNumberProbe { url: self.config.targets[idx].url.clone() });
            let handle = tokio::spawn(health::run_prober(
                idx,
                self.config.name.clone(),
                self.registry.clone(),
                probe,
                self.probe_client.clone(),
                self.config.clone(),
                cancel.clone(),
            ));
            self.probe_handles.push(handle);
        }
    }

    /// Cancels the shared token and waits for every probe task to exit.
    pub async fn stop(&mut self, cancel: CancellationToken) {
        cancel.cancel();
        for handle in self.probe_handles.drain(..) {
            let _ = handle.await;
        }
        info!(gateway = %self.config.name, "health probes stopped");
    }
}
