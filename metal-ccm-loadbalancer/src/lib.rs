mod cluster;
mod config;
mod error;
pub mod implementor;
mod reconciler;
mod runtime;

pub use cluster::{ClusterClient, KubeClusterClient, cluster_id};
pub use config::{DEFAULT_METALLB_CONFIG, DEFAULT_METALLB_NAMESPACE, LoadBalancerConfig};
pub use error::{Error, Result};
pub use implementor::{Implementor, implementor};
pub use reconciler::{
    FACILITY_ANNOTATION, METRO_ANNOTATION, Mode, Reconciler, USAGE_TAG, service_hash,
};
pub use runtime::start_loadbalancer_controller;

/// Field manager for objects this crate applies.
pub const MANAGER: &str = "metal-ccm-loadbalancer";
