mod cluster;
mod error;
mod health;
mod manager;
pub mod mirror;
mod runtime;

pub use cluster::{ControlPlaneClient, KubeControlPlaneClient};
pub use error::{Error, Result};
pub use health::{HealthProber, HttpsProber, PROBE_TIMEOUT};
pub use manager::{ControlPlaneManager, DEFAULT_API_SERVER_PORT};
pub use runtime::start_controlplane_controller;

/// Field manager for objects this crate applies.
pub const MANAGER: &str = "metal-ccm-controlplane";
