use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use metal_ccm_k8s_utils::{CONTROL_PLANE_LABEL, MASTER_LABEL};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::debug;

use crate::{MANAGER, Result};

/// Cluster operations the failover manager depends on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Nodes carrying either control plane role label, ordered by name.
    async fn control_plane_nodes(&self) -> Result<Vec<Node>>;

    /// Server side applies the Service spec, then its status.
    async fn apply_service(&self, service: Service) -> Result<()>;

    async fn apply_endpoint_slice(&self, slice: EndpointSlice) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeControlPlaneClient {
    client: Client,
}

impl KubeControlPlaneClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn apply_params() -> PatchParams {
    PatchParams::apply(MANAGER).force()
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlaneClient {
    async fn control_plane_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut nodes = BTreeMap::new();
        for label in [CONTROL_PLANE_LABEL, MASTER_LABEL] {
            for node in api.list(&ListParams::default().labels(label)).await?.items {
                nodes.insert(node.name_any(), node);
            }
        }
        Ok(nodes.into_values().collect())
    }

    async fn apply_service(&self, mut service: Service) -> Result<()> {
        let name = service.name_any();
        let namespace = service.namespace().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let status = service.status.take();

        api.patch(&name, &apply_params(), &Patch::Apply(&service))
            .await?;
        if let Some(status) = status {
            let patch = json!({
                "apiVersion": "v1",
                "kind": "Service",
                "status": status,
            });
            api.patch_status(&name, &apply_params(), &Patch::Apply(&patch))
                .await?;
        }
        debug!(%namespace, %name, "applied service");
        Ok(())
    }

    async fn apply_endpoint_slice(&self, slice: EndpointSlice) -> Result<()> {
        let name = slice.name_any();
        let namespace = slice.namespace().unwrap_or_default();
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&name, &apply_params(), &Patch::Apply(&slice))
            .await?;
        debug!(%namespace, %name, "applied endpoint slice");
        Ok(())
    }
}
