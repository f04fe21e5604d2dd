use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{GatewayConfig, UpstreamConfig};

/// Mutable per-upstream health state. Owned by the `HealthRegistry`, written
/// only by the probe for that upstream, read by dispatchers and the status
/// endpoint. `healthy` and `block_number` are read together under one lock
/// so a reader never observes a torn combination of the two.
#[derive(Debug, Clone, Default)]
pub struct UpstreamState {
    pub healthy: bool,
    pub block_number: Option<u64>,
    pub consecutive_success: u32,
    pub consecutive_failure: u32,
    pub last_probe_at: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamSnapshot {
    pub name: String,
    pub url: String,
    pub healthy: bool,
    pub block_number: Option<u64>,
    pub consecutive_success: u32,
    pub consecutive_failure: u32,
    #[serde(skip)]
    pub last_probe_at: Option<Instant>,
}

/// Aggregates probe state for every upstream in one gateway and exposes the
/// two queries the dispatcher needs: the ordered list of currently-usable
/// upstreams, and a point-in-time snapshot for observability.
///
/// Each upstream gets its own lock rather than one lock over the whole
/// registry, so a slow write on one upstream never stalls reads of another —
/// the fast path (every request calls `ordered_healthy`) must not serialize
/// on an unrelated upstream's probe.
pub struct HealthRegistry {
    upstreams: Vec<UpstreamConfig>,
    state: Vec<RwLock<UpstreamState>>,
    failure_threshold: u32,
    success_threshold: u32,
    lag_tolerance: u64,
}

impl HealthRegistry {
    pub fn new(gateway: &GatewayConfig) -> Self {
        let upstreams = gateway.targets.clone();
        let state = upstreams.iter().map(|_| RwLock::new(UpstreamState::default())).collect();
        Self {
            upstreams,
            state,
            failure_threshold: gateway.health_checks.failure_threshold,
            success_threshold: gateway.health_checks.success_threshold,
            lag_tolerance: gateway.health_checks.lag_tolerance,
        }
    }

    pub fn upstreams(&self) -> &[UpstreamConfig] {
        &self.upstreams
    }

    /// Applies one successful probe outcome to upstream `idx`'s state
    /// machine. `healthy` flips false→true only once `success_threshold`
    /// consecutive successes have been observed.
    pub async fn record_success(&self, idx: usize, block_number: u64) {
        let mut st = self.state[idx].write().await;
        st.consecutive_success += 1;
        st.consecutive_failure = 0;
        st.block_number = Some(block_number);
        st.last_probe_at = Some(Instant::now());
        if !st.healthy && st.consecutive_success >= self.success_threshold {
            st.healthy = true;
        }
    }

    /// Applies one failed probe outcome. `block_number` is left untouched —
    /// a failure never clears the last known value. `healthy` flips
    /// true→false only once `failure_threshold` consecutive failures have
    /// been observed.
    pub async fn record_failure(&self, idx: usize) {
        let mut st = self.state[idx].write().await;
        st.consecutive_failure += 1;
        st.consecutive_success = 0;
        st.last_probe_at = Some(Instant::now());
        if st.healthy && st.consecutive_failure >= self.failure_threshold {
            st.healthy = false;
        }
    }

    /// The healthy upstreams, in configured preference order, filtered to
    /// those within `lag_tolerance` blocks of the most advanced healthy peer.
    pub async fn ordered_healthy(&self) -> Vec<UpstreamConfig> {
        let mut healthy = Vec::with_capacity(self.upstreams.len());
        for (cfg, state) in self.upstreams.iter().zip(&self.state) {
            let st = state.read().await;
            if st.healthy {
                healthy.push((cfg.clone(), st.block_number.unwrap_or(0)));
            }
        }

        let Some(tip) = healthy.iter().map(|(_, block)| *block).max() else {
            return Vec::new();
        };
        let floor = tip.saturating_sub(self.lag_tolerance);

        healthy
            .into_iter()
            .filter(|(_, block)| *block >= floor)
            .map(|(cfg, _)| cfg)
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<UpstreamSnapshot> {
        let mut out = Vec::with_capacity(self.upstreams.len());
        for (cfg, state) in self.upstreams.iter().zip(&self.state) {
            let st = state.read().await;
            out.push(UpstreamSnapshot {
                name: cfg.name.clone(),
                url: cfg.url.clone(),
                healthy: st.healthy,
                block_number: st.block_number,
                consecutive_success: st.consecutive_success,
                consecutive_failure: st.consecutive_failure,
                last_probe_at: st.last_probe_at,
            });
        }
        out
    }
}
