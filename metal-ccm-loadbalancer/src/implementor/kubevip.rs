use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Implementor, NodePeering, NodePeers};
use crate::Result;
use crate::cluster::ClusterClient;

const ANNOTATION_PREFIX: &str = "metal.equinix.com/bgp-peers-";

/// Publishes peering parameters as node annotations for kube-vip to read.
/// Service addresses are picked up by kube-vip from the Service itself.
pub struct KubeVip {
    cluster: Arc<dyn ClusterClient>,
}

impl KubeVip {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }
}

fn peering_annotations(peering: &NodePeering) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for (i, peer_ip) in peering.peer_ips.iter().enumerate() {
        let key = |suffix: &str| format!("{ANNOTATION_PREFIX}{i}-{suffix}");
        annotations.insert(key("node-asn"), peering.local_asn.to_string());
        annotations.insert(key("peer-asn"), peering.peer_asn.to_string());
        annotations.insert(key("peer-ip"), peer_ip.clone());
        annotations.insert(key("src-ip"), peering.source_ip.clone());
        annotations.insert(key("bgp-pass"), peering.password.clone());
    }
    annotations
}

/// Patch turning `current` into `desired` for the keys this backend owns.
fn annotation_patch(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, Option<String>> {
    let mut patch: BTreeMap<String, Option<String>> = current
        .keys()
        .filter(|k| k.starts_with(ANNOTATION_PREFIX) && !desired.contains_key(*k))
        .map(|k| (k.clone(), None))
        .collect();
    for (k, v) in desired {
        if current.get(k) != Some(v) {
            patch.insert(k.clone(), Some(v.clone()));
        }
    }
    patch
}

impl KubeVip {
    async fn converge(&self, name: &str, desired: BTreeMap<String, String>) -> Result<()> {
        let current = self.cluster.node_annotations(name).await?;
        let patch = annotation_patch(&current, &desired);
        if patch.is_empty() {
            debug!(node = name, "kube-vip annotations up to date");
            return Ok(());
        }
        self.cluster.patch_node_annotations(name, patch).await?;
        info!(node = name, "updated kube-vip annotations");
        Ok(())
    }
}

#[async_trait]
impl Implementor for KubeVip {
    async fn add_service(&self, _namespace: &str, _name: &str, _cidr: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_service(&self, _cidr: &str) -> Result<()> {
        Ok(())
    }

    async fn update_service(
        &self,
        _namespace: &str,
        _name: &str,
        _nodes: &NodePeers,
    ) -> Result<()> {
        Ok(())
    }

    async fn add_node(&self, name: &str, peering: &NodePeering) -> Result<()> {
        self.converge(name, peering_annotations(peering)).await
    }

    async fn remove_node(&self, name: &str) -> Result<()> {
        self.converge(name, BTreeMap::new()).await
    }

    async fn sync_nodes(&self, nodes: &NodePeers) -> Result<()> {
        for name in self.cluster.annotated_nodes(ANNOTATION_PREFIX).await? {
            if !nodes.contains_key(&name) {
                self.converge(&name, BTreeMap::new()).await?;
            }
        }
        for (name, peering) in nodes {
            self.add_node(name, peering).await?;
        }
        Ok(())
    }

    async fn sync_services(&self, _valid: &[String]) -> Result<()> {
        Ok(())
    }
}
