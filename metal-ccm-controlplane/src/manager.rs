use std::sync::{Arc, OnceLock};

use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use metal_ccm_k8s_utils::{
    external_address, is_control_plane, is_pending_deletion, is_unschedulable, node_addresses,
    parse_provider_id, provider_id,
};
use metal_ccm_metal::types::{IpAssignment, IpReservation};
use metal_ccm_metal::{MetalApi, first_reservation_with_tags};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cluster::ControlPlaneClient;
use crate::health::HealthProber;
use crate::mirror::{
    SERVICE_NAME_LABEL, SOURCE_NAME, SOURCE_NAMESPACE, endpoint_port, external_endpoint_slice,
    external_service, service_port,
};
use crate::{Error, MANAGER, Result};

pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

/// Keeps the control plane floating address on a healthy control plane node
/// and mirrors the API server Service onto it.
///
/// Every path that may move the address holds `assignment_lock` from reading
/// the reservation until the new assignment exists, so at most one
/// reassignment is ever in flight.
pub struct ControlPlaneManager {
    metal: Arc<dyn MetalApi>,
    cluster: Arc<dyn ControlPlaneClient>,
    prober: Arc<dyn HealthProber>,
    eip_tag: String,
    use_host_ip: bool,
    api_server_port: OnceLock<u16>,
    node_api_port: OnceLock<u16>,
    service_lock: Mutex<()>,
    endpoints_lock: Mutex<()>,
    assignment_lock: Mutex<()>,
}

impl ControlPlaneManager {
    pub fn new(
        metal: Arc<dyn MetalApi>,
        cluster: Arc<dyn ControlPlaneClient>,
        prober: Arc<dyn HealthProber>,
        eip_tag: impl Into<String>,
    ) -> Self {
        Self {
            metal,
            cluster,
            prober,
            eip_tag: eip_tag.into(),
            use_host_ip: false,
            api_server_port: OnceLock::new(),
            node_api_port: OnceLock::new(),
            service_lock: Mutex::new(()),
            endpoints_lock: Mutex::new(()),
            assignment_lock: Mutex::new(()),
        }
    }

    /// Fixes the API server port. Zero leaves it to be detected from the
    /// `default/kubernetes` Service.
    pub fn with_api_server_port(self, port: u16) -> Self {
        if port != 0 {
            let _ = self.api_server_port.set(port);
        }
        self
    }

    /// Health checks the holder through its own external address instead of
    /// the floating address.
    pub fn with_host_ip_health_check(mut self, enabled: bool) -> Self {
        self.use_host_ip = enabled;
        self
    }

    pub fn api_server_port(&self) -> u16 {
        self.api_server_port
            .get()
            .or(self.node_api_port.get())
            .copied()
            .unwrap_or(DEFAULT_API_SERVER_PORT)
    }

    pub fn node_api_port(&self) -> u16 {
        self.node_api_port
            .get()
            .or(self.api_server_port.get())
            .copied()
            .unwrap_or(DEFAULT_API_SERVER_PORT)
    }

    async fn reservation(&self) -> Result<IpReservation> {
        let reservations = self.metal.list_reservations().await?;
        first_reservation_with_tags(&[self.eip_tag.as_str()], &reservations)?
            .cloned()
            .ok_or_else(|| Error::ReservationNotFound(self.eip_tag.clone()))
    }

    /// Node update entry point. Unschedulable or terminating nodes give the
    /// address away, the rest are health checked.
    pub async fn handle_node(&self, node: &Node) -> Result<()> {
        if !is_control_plane(node) {
            return Ok(());
        }
        if is_unschedulable(node) || is_pending_deletion(node) {
            self.reassign_away(node).await
        } else {
            self.health_check(node).await
        }
    }

    pub async fn handle_node_deleted(&self, node: &Node) -> Result<()> {
        if !is_control_plane(node) {
            return Ok(());
        }
        self.reassign_away(node).await
    }

    /// Moves the address to another node if `node` holds it, or places it if
    /// nobody does.
    #[instrument(skip_all, fields(node = %node.name_any()))]
    pub async fn reassign_away(&self, node: &Node) -> Result<()> {
        let _guard = self.assignment_lock.lock().await;
        let reservation = self.reservation().await?;
        let name = node.name_any();
        let device = device_id(node)?;
        match holder(&reservation)? {
            None => self.reassign_locked(&reservation, Some(&name)).await,
            Some(_) if device.is_some_and(|d| reservation.is_assigned_to(d)) => {
                info!(address = %reservation.address, "moving floating address off node");
                self.reassign_locked(&reservation, Some(&name)).await
            }
            Some(_) => Ok(()),
        }
    }

    /// Reassigns when the address is unassigned or `node` holds it and fails
    /// its health check. Otherwise a no-op.
    #[instrument(skip_all, fields(node = %node.name_any()))]
    pub async fn health_check(&self, node: &Node) -> Result<()> {
        let _guard = self.assignment_lock.lock().await;
        let reservation = self.reservation().await?;
        if holder(&reservation)?.is_none() {
            info!(address = %reservation.address, "floating address is unassigned");
            return self.reassign_locked(&reservation, None).await;
        }
        let Some(device) = device_id(node)? else {
            return Ok(());
        };
        if !reservation.is_assigned_to(device) {
            return Ok(());
        }

        let (address, port) = match external_address(node).filter(|_| self.use_host_ip) {
            Some(address) => (address, self.node_api_port()),
            None => (reservation.address.clone(), self.api_server_port()),
        };
        if self.prober.is_healthy(&address, port).await {
            debug!(%address, port, "floating address holder is healthy");
            return Ok(());
        }
        warn!(%address, port, "floating address holder failed health check");
        self.reassign_locked(&reservation, Some(&node.name_any()))
            .await
    }

    /// Caller holds `assignment_lock`. Probes candidates in order and moves
    /// the address to the first healthy one. Leaves the reservation untouched
    /// when none answer.
    async fn reassign_locked(
        &self,
        reservation: &IpReservation,
        exclude: Option<&str>,
    ) -> Result<()> {
        let current = holder(reservation)?;
        let nodes = self.cluster.control_plane_nodes().await?;
        let port = self.node_api_port();

        for node in candidates(&nodes, exclude) {
            let name = node.name_any();
            let device = match device_id(node) {
                Ok(Some(device)) => device,
                Ok(None) => {
                    debug!(node = %name, "skipping node without provider id");
                    continue;
                }
                Err(e) => {
                    warn!(node = %name, %e, "skipping node");
                    continue;
                }
            };
            for address in node_addresses(node) {
                if address == reservation.address {
                    continue;
                }
                if !self.prober.is_healthy(&address, port).await {
                    debug!(node = %name, %address, port, "candidate unhealthy");
                    continue;
                }
                if reservation.is_assigned_to(device) {
                    debug!(node = %name, "floating address already on healthy node");
                    return Ok(());
                }
                if let Some(assignment) = current {
                    self.metal.unassign_ip(&assignment.id).await?;
                }
                self.metal.assign_ip(device, &reservation.address).await?;
                info!(
                    node = %name,
                    device,
                    address = %reservation.address,
                    "assigned floating address"
                );
                return Ok(());
            }
        }
        Err(Error::NoHealthyCandidate(reservation.address.clone()))
    }

    /// Mirrors `default/kubernetes` onto the floating address, capturing the
    /// API server port the first time it is seen.
    pub async fn sync_service(&self, source: &Service) -> Result<()> {
        if source.namespace().as_deref() != Some(SOURCE_NAMESPACE) || source.name_any() != SOURCE_NAME
        {
            return Ok(());
        }
        let _guard = self.service_lock.lock().await;
        if let Some(port) = service_port(source)
            && self.api_server_port.set(port).is_ok()
        {
            info!(port, "detected api server port");
        }
        let reservation = self.reservation().await?;
        self.cluster
            .apply_service(external_service(source, &reservation.address))
            .await
    }

    pub async fn sync_endpoints(&self, source: &EndpointSlice) -> Result<()> {
        let is_source = source.namespace().as_deref() == Some(SOURCE_NAMESPACE)
            && source.labels().get(SERVICE_NAME_LABEL).map(String::as_str) == Some(SOURCE_NAME);
        if !is_source {
            return Ok(());
        }
        let _guard = self.endpoints_lock.lock().await;
        if let Some(port) = endpoint_port(source)
            && self.node_api_port.set(port).is_ok()
        {
            info!(port, "detected node api server port");
        }
        self.cluster
            .apply_endpoint_slice(external_endpoint_slice(source, MANAGER))
            .await
    }
}

fn holder(reservation: &IpReservation) -> Result<Option<&IpAssignment>> {
    match reservation.assignments.as_slice() {
        [] => Ok(None),
        [assignment] => Ok(Some(assignment)),
        many => Err(Error::MultipleAssignments {
            id: reservation.id.clone(),
            count: many.len(),
        }),
    }
}

fn device_id(node: &Node) -> Result<Option<&str>> {
    Ok(provider_id(node).map(parse_provider_id).transpose()?)
}

/// Live nodes, preferring schedulable ones and then ones other than
/// `exclude`. A filter that would leave nothing is skipped.
pub(crate) fn candidates<'a>(nodes: &'a [Node], exclude: Option<&str>) -> Vec<&'a Node> {
    let live: Vec<&Node> = nodes.iter().filter(|n| !is_pending_deletion(n)).collect();
    let schedulable: Vec<&Node> = live
        .iter()
        .copied()
        .filter(|n| !is_unschedulable(n))
        .collect();
    let pool = if schedulable.is_empty() { live } else { schedulable };

    let Some(exclude) = exclude else {
        return pool;
    };
    let others: Vec<&Node> = pool
        .iter()
        .copied()
        .filter(|n| n.name_any() != exclude)
        .collect();
    if others.is_empty() { pool } else { others }
}
