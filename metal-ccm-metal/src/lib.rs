mod bgp;
mod client;
mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
mod tags;
pub mod types;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

pub use bgp::BgpProvisioner;
pub use client::MetalClient;
pub use error::{Error, Result};
pub use tags::{first_reservation_with_tags, reservations_with_tags};

use crate::types::{
    BgpConfig, BgpConfigRequest, BgpNeighbor, IpAssignment, IpReservation,
    IpReservationRequest,
};

pub const DEFAULT_API_URL: &str = "https://api.equinix.com/metal/v1/";

/// Operations consumed from the infrastructure provider. All calls are scoped to
/// the project the implementation was created for.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetalApi: Send + Sync {
    async fn list_bgp_neighbors(&self, device_id: &str) -> Result<Vec<BgpNeighbor>>;

    async fn create_bgp_session(&self, device_id: &str) -> Result<()>;

    async fn get_project_bgp_config(&self) -> Result<BgpConfig>;

    async fn create_project_bgp_config(&self, request: &BgpConfigRequest) -> Result<()>;

    /// Lists every reservation in the project with its current assignments.
    async fn list_reservations(&self) -> Result<Vec<IpReservation>>;

    /// Requests a new reservation. Implementations must fail instead of queueing
    /// the request for manual approval.
    async fn request_reservation(&self, request: &IpReservationRequest) -> Result<IpReservation>;

    async fn delete_reservation(&self, reservation_id: &str) -> Result<()>;

    async fn assign_ip(&self, device_id: &str, address: &str) -> Result<IpAssignment>;

    async fn unassign_ip(&self, assignment_id: &str) -> Result<()>;
}
