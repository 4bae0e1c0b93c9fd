mod events;
mod metrics;
mod node;

use thiserror::Error;

pub use events::{Change, dispatch_changes};
pub use metrics::{ControllerMetrics, MetricLabel, REGISTRY, ReconcileMeasurer};
pub use node::{
    CONTROL_PLANE_LABEL, MASTER_LABEL, external_address, is_control_plane, is_pending_deletion,
    is_unschedulable, node_addresses, parse_provider_id, provider_id,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid provider id {0:?}")]
    InvalidProviderId(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Services carrying this annotation are never given a load balancer address.
pub const SKIP_LOAD_BALANCER_ANNOTATION: &str = "metal.equinix.com/skip-load-balancer";
