mod probe;
mod prober;
mod registry;

pub use probe::{HealthCheck, JsonRpcBlockNumberProbe};
pub use prober::run as run_prober;
pub use registry::{HealthRegistry, UpstreamSnapshot, UpstreamState};
