mod empty;
mod kubevip;
mod metallb;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

pub use empty::Empty;
pub use kubevip::KubeVip;
pub use metallb::{ConfigMapStore, ConfigStore, CrdStore, MetalLb};
#[cfg(test)]
pub(crate) use metallb::testing as metallb_testing;

use crate::Result;
use crate::cluster::ClusterClient;
use crate::config::LoadBalancerConfig;

/// BGP session parameters for one node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePeering {
    pub local_asn: u32,
    pub peer_asn: u32,
    pub password: String,
    pub source_ip: String,
    pub peer_ips: Vec<String>,
}

/// A node name paired with its peering parameters.
pub type NodePeers = BTreeMap<String, NodePeering>;

/// Backend materialising load balancer addresses and BGP peering.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Implementor: Send + Sync {
    async fn add_service(&self, namespace: &str, name: &str, cidr: &str) -> Result<()>;

    async fn remove_service(&self, cidr: &str) -> Result<()>;

    /// Restricts the Service's announcements to the given nodes.
    async fn update_service(&self, namespace: &str, name: &str, nodes: &NodePeers) -> Result<()>;

    async fn add_node(&self, name: &str, peering: &NodePeering) -> Result<()>;

    async fn remove_node(&self, name: &str) -> Result<()>;

    /// Makes the node set exactly `nodes`.
    async fn sync_nodes(&self, nodes: &NodePeers) -> Result<()>;

    /// Drops every service address not in `valid`.
    async fn sync_services(&self, valid: &[String]) -> Result<()>;
}

/// Builds the backend for `config`. `None` when load balancing is disabled.
pub fn implementor(
    config: &LoadBalancerConfig,
    client: kube::Client,
    cluster: Arc<dyn ClusterClient>,
    use_crds: bool,
) -> Option<Arc<dyn Implementor>> {
    match config {
        LoadBalancerConfig::MetalLb { namespace, name } => {
            let store: Arc<dyn ConfigStore> = if use_crds {
                Arc::new(CrdStore::new(client, namespace))
            } else {
                Arc::new(ConfigMapStore::new(client, namespace, name))
            };
            Some(Arc::new(MetalLb::new(store)))
        }
        LoadBalancerConfig::KubeVip => Some(Arc::new(KubeVip::new(cluster))),
        LoadBalancerConfig::Empty => Some(Arc::new(Empty)),
        LoadBalancerConfig::Disabled => None,
    }
}
