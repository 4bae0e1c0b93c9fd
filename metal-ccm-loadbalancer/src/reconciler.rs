use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;
use metal_ccm_k8s_utils::{SKIP_LOAD_BALANCER_ANNOTATION, parse_provider_id, provider_id};
use metal_ccm_metal::types::{IpReservation, IpReservationRequest};
use metal_ccm_metal::{BgpProvisioner, MetalApi, first_reservation_with_tags, reservations_with_tags};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::ClusterClient;
use crate::implementor::{Implementor, NodePeering, NodePeers};
use crate::{Error, Result};

pub const USAGE_TAG: &str = "usage=cloud-provider-equinix-metal-auto";
pub const SERVICE_TAG_PREFIX: &str = "service=";
pub const CLUSTER_TAG_PREFIX: &str = "cluster=";
pub const RESERVATION_DESCRIPTION: &str =
    "Equinix Metal Kubernetes CCM auto-generated for Load Balancer";
pub const METRO_ANNOTATION: &str = "metal.equinix.com/metro";
pub const FACILITY_ANNOTATION: &str = "metal.equinix.com/facility";

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
const LOAD_BALANCER: &str = "LoadBalancer";
const LOCAL_TRAFFIC_POLICY: &str = "Local";
const DEFAULT_CIDR: u8 = 32;

/// Which watch transition a reconcile call is handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Add,
    Remove,
    Sync,
}

/// Opaque, fixed length digest of `namespace/name`.
pub fn service_hash(namespace: &str, name: &str) -> String {
    STANDARD.encode(Sha256::digest(format!("{namespace}/{name}").as_bytes()))
}

pub fn service_tag(namespace: &str, name: &str) -> String {
    format!("{SERVICE_TAG_PREFIX}{}", service_hash(namespace, name))
}

pub fn cluster_tag(cluster_id: &str) -> String {
    format!("{CLUSTER_TAG_PREFIX}{cluster_id}")
}

fn is_managed(service: &Service) -> bool {
    let is_lb = service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == LOAD_BALANCER);
    is_lb && !service.annotations().contains_key(SKIP_LOAD_BALANCER_ANNOTATION)
}

fn is_local(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.external_traffic_policy.as_deref())
        .is_some_and(|p| p == LOCAL_TRAFFIC_POLICY)
}

fn requested_address(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.load_balancer_ip.clone())
        .filter(|ip| !ip.is_empty())
}

fn reported_address(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .clone()
}

fn namespaced_name(service: &Service) -> Result<(String, String)> {
    let name = service.name_any();
    let namespace = service
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(name.clone()))?;
    Ok((namespace, name))
}

/// Drives reservation lifecycle for Services and peering for Nodes through
/// the configured [`Implementor`].
pub struct Reconciler {
    metal: Arc<dyn MetalApi>,
    bgp: BgpProvisioner,
    cluster: Arc<dyn ClusterClient>,
    implementor: Arc<dyn Implementor>,
    cluster_id: String,
    metro: Option<String>,
    facility: Option<String>,
    /// One lock per `namespace/name`, held across reservation lookup, request
    /// and write-back.
    service_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        metal: Arc<dyn MetalApi>,
        bgp: BgpProvisioner,
        cluster: Arc<dyn ClusterClient>,
        implementor: Arc<dyn Implementor>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            metal,
            bgp,
            cluster,
            implementor,
            cluster_id: cluster_id.into(),
            metro: None,
            facility: None,
            service_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Default location for new reservations, overridable per Service.
    pub fn with_location(mut self, metro: Option<String>, facility: Option<String>) -> Self {
        self.metro = metro.filter(|m| !m.is_empty());
        self.facility = facility.filter(|f| !f.is_empty());
        self
    }

    pub fn bgp(&self) -> &BgpProvisioner {
        &self.bgp
    }

    async fn lock_service(&self, namespace: &str, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.service_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(format!("{namespace}/{name}"))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    fn service_tags(&self, namespace: &str, name: &str) -> Vec<String> {
        vec![
            service_tag(namespace, name),
            USAGE_TAG.to_string(),
            cluster_tag(&self.cluster_id),
        ]
    }

    async fn node_peering(&self, node: &Node) -> Result<NodePeering> {
        let name = node.name_any();
        let provider = provider_id(node).ok_or_else(|| Error::MissingProviderId(name.clone()))?;
        let device = parse_provider_id(provider)?;
        self.bgp.ensure_node_bgp_enabled(device).await?;
        let neighbor = self.bgp.get_node_bgp_neighbor(device).await?;
        Ok(NodePeering {
            local_asn: if neighbor.customer_as == 0 {
                self.bgp.local_asn()
            } else {
                neighbor.customer_as
            },
            peer_asn: neighbor.peer_as,
            password: neighbor
                .md5_password
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| self.bgp.password().to_string()),
            source_ip: neighbor.customer_ip,
            peer_ips: neighbor.peer_ips,
        })
    }

    #[instrument(skip_all, fields(mode = ?mode, nodes = nodes.len()))]
    pub async fn reconcile_nodes(&self, nodes: &[Node], mode: Mode) -> Result<()> {
        match mode {
            Mode::Remove => {
                for node in nodes {
                    let name = node.name_any();
                    match self.implementor.remove_node(&name).await {
                        Ok(()) => info!(node = %name, "removed node"),
                        Err(e) => warn!(node = %name, %e, "failed to remove node"),
                    }
                }
            }
            Mode::Add => {
                for node in nodes {
                    let name = node.name_any();
                    let peering = match self.node_peering(node).await {
                        Ok(peering) => peering,
                        Err(e @ Error::MissingProviderId(_)) => return Err(e),
                        Err(e) => {
                            error!(node = %name, %e, "failed to get bgp peering for node");
                            continue;
                        }
                    };
                    if let Err(e) = self.implementor.add_node(&name, &peering).await {
                        error!(node = %name, %e, "failed to add node");
                    }
                }
            }
            Mode::Sync => {
                let mut desired = NodePeers::new();
                for node in nodes {
                    let name = node.name_any();
                    match self.node_peering(node).await {
                        Ok(peering) => {
                            desired.insert(name, peering);
                        }
                        Err(e) => warn!(node = %name, %e, "skipping node in sync"),
                    }
                }
                self.implementor.sync_nodes(&desired).await?;
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(mode = ?mode, services = services.len()))]
    pub async fn reconcile_services(&self, services: &[Service], mode: Mode) -> Result<()> {
        let reservations = self.metal.list_reservations().await?;
        let valid: Vec<&Service> = services.iter().filter(|s| is_managed(s)).collect();

        for service in &valid {
            let result = match mode {
                Mode::Add | Mode::Sync => self.add_service(service, &reservations).await,
                Mode::Remove => self.remove_service(service, &reservations).await,
            };
            if let Err(e) = result {
                error!(service = %service.name_any(), %e, ?mode, "failed to reconcile service");
            }
        }

        if mode == Mode::Sync {
            self.sync_services(&valid).await?;
        }
        Ok(())
    }

    /// Re-runs the add path for the Service owning `slice` when its traffic
    /// policy makes announcements depend on endpoint placement.
    pub async fn reconcile_endpoint_slice(&self, slice: &EndpointSlice) -> Result<()> {
        let (Some(namespace), Some(name)) =
            (slice.namespace(), slice.labels().get(SERVICE_NAME_LABEL))
        else {
            return Ok(());
        };
        let Some(service) = self.cluster.get_service(&namespace, name).await? else {
            return Ok(());
        };
        if !is_managed(&service) || !is_local(&service) {
            return Ok(());
        }
        self.reconcile_services(&[service], Mode::Add).await
    }

    async fn add_service(&self, service: &Service, reservations: &[IpReservation]) -> Result<()> {
        let (namespace, name) = namespaced_name(service)?;
        let _guard = self.lock_service(&namespace, &name).await;
        let tags = self.service_tags(&namespace, &name);

        let (address, prefix) = match first_reservation_with_tags(&tags, reservations)? {
            Some(reservation) => (reservation.address.clone(), reservation.cidr),
            None => match requested_address(service) {
                Some(address) => (address, DEFAULT_CIDR),
                None => {
                    // the batch listing may predate a request made under this lock
                    let current = self.metal.list_reservations().await?;
                    let reservation = match first_reservation_with_tags(&tags, &current)? {
                        Some(reservation) => reservation.clone(),
                        None => self.request_reservation(service, tags).await?,
                    };
                    (reservation.address, reservation.cidr)
                }
            },
        };

        if requested_address(service).as_deref() != Some(address.as_str())
            || reported_address(service).as_deref() != Some(address.as_str())
        {
            self.cluster
                .set_service_address(&namespace, &name, &address)
                .await?;
            info!(%namespace, %name, %address, "assigned load balancer address");
        }

        let cidr = metal_ccm_metallb::cidr(&address, prefix)?;
        self.implementor
            .add_service(&namespace, &name, &cidr)
            .await?;

        let nodes = if is_local(service) {
            self.endpoint_peers(&namespace, &name).await?
        } else {
            NodePeers::new()
        };
        self.implementor
            .update_service(&namespace, &name, &nodes)
            .await
    }

    async fn request_reservation(
        &self,
        service: &Service,
        tags: Vec<String>,
    ) -> Result<IpReservation> {
        let annotations = service.annotations();
        let metro = annotations
            .get(METRO_ANNOTATION)
            .cloned()
            .or_else(|| self.metro.clone());
        let facility = annotations
            .get(FACILITY_ANNOTATION)
            .cloned()
            .or_else(|| self.facility.clone());

        let mut request = IpReservationRequest::public_ipv4(tags);
        request.details = Some(RESERVATION_DESCRIPTION.to_string());
        request.facility = if metro.is_some() { None } else { facility };
        request.metro = metro;

        let reservation = self.metal.request_reservation(&request).await?;
        info!(
            service = %service.name_any(),
            address = %reservation.address,
            "reserved load balancer address"
        );
        Ok(reservation)
    }

    async fn endpoint_peers(&self, namespace: &str, name: &str) -> Result<NodePeers> {
        let mut peers = NodePeers::new();
        for node_name in self.cluster.endpoint_nodes(namespace, name).await? {
            let Some(node) = self.cluster.get_node(&node_name).await? else {
                continue;
            };
            match self.node_peering(&node).await {
                Ok(peering) => {
                    peers.insert(node_name, peering);
                }
                Err(e) => warn!(node = %node_name, %e, "skipping endpoint node"),
            }
        }
        Ok(peers)
    }

    async fn remove_service(
        &self,
        service: &Service,
        reservations: &[IpReservation],
    ) -> Result<()> {
        let (namespace, name) = namespaced_name(service)?;
        let _guard = self.lock_service(&namespace, &name).await;
        let tags = self.service_tags(&namespace, &name);
        let Some(reservation) = first_reservation_with_tags(&tags, reservations)? else {
            debug!(%namespace, %name, "no reservation to release");
            return Ok(());
        };
        match self.metal.delete_reservation(&reservation.id).await {
            Ok(()) => info!(
                %namespace,
                %name,
                address = %reservation.address,
                "released load balancer address"
            ),
            Err(e) if e.is_not_found() => {
                debug!(%namespace, %name, "reservation already released");
            }
            Err(e) => return Err(e.into()),
        }
        self.implementor
            .remove_service(&reservation.cidr_notation())
            .await
    }

    async fn sync_services(&self, valid: &[&Service]) -> Result<()> {
        let reservations = self.metal.list_reservations().await?;
        let mut valid_tags = BTreeSet::new();
        let mut valid_addresses = Vec::new();
        for service in valid {
            let (namespace, name) = namespaced_name(service)?;
            valid_tags.insert(service_tag(&namespace, &name));
            let tags = self.service_tags(&namespace, &name);
            match first_reservation_with_tags(&tags, &reservations)? {
                Some(reservation) => valid_addresses.push(reservation.cidr_notation()),
                None => {
                    if let Some(address) = requested_address(service) {
                        valid_addresses.push(metal_ccm_metallb::cidr(&address, DEFAULT_CIDR)?);
                    }
                }
            }
        }
        self.implementor.sync_services(&valid_addresses).await?;

        let owned = [USAGE_TAG.to_string(), cluster_tag(&self.cluster_id)];
        for reservation in reservations_with_tags(&owned, &reservations) {
            let orphaned = reservation
                .tags
                .iter()
                .find(|t| t.starts_with(SERVICE_TAG_PREFIX))
                .is_some_and(|t| !valid_tags.contains(t));
            if !orphaned {
                continue;
            }
            match self.metal.delete_reservation(&reservation.id).await {
                Ok(()) => info!(
                    id = %reservation.id,
                    address = %reservation.address,
                    "deleted orphaned reservation"
                ),
                Err(e) => error!(id = %reservation.id, %e, "failed to delete orphaned reservation"),
            }
        }
        Ok(())
    }
}
