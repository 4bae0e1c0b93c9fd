use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::{Error, Result};

pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

const HOSTNAME_ADDRESS: &str = "Hostname";
const EXTERNAL_ADDRESS: &str = "ExternalIP";

pub fn is_control_plane(node: &Node) -> bool {
    let labels = node.labels();
    labels.contains_key(CONTROL_PLANE_LABEL) || labels.contains_key(MASTER_LABEL)
}

pub fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

pub fn is_pending_deletion(node: &Node) -> bool {
    node.metadata.deletion_timestamp.is_some()
}

pub fn provider_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .filter(|id| !id.is_empty())
}

/// Device id from a `scheme://id` provider id.
pub fn parse_provider_id(provider_id: &str) -> Result<&str> {
    match provider_id.split_once("://") {
        Some((scheme, id)) if !scheme.is_empty() && !id.is_empty() && !id.contains('/') => Ok(id),
        _ => Err(Error::InvalidProviderId(provider_id.to_string())),
    }
}

/// Every reported address except hostnames, in status order.
pub fn node_addresses(node: &Node) -> Vec<String> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .map(|addrs| {
            addrs
                .iter()
                .filter(|a| a.type_ != HOSTNAME_ADDRESS)
                .map(|a| a.address.clone())
                .collect()
        })
        .unwrap_or_default()
}

pub fn external_address(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == EXTERNAL_ADDRESS)
        .map(|a| a.address.clone())
}
