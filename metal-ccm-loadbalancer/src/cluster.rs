use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::{Value, json};
use tracing::debug;

use crate::{MANAGER, Result};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
const CLUSTER_ID_NAMESPACE: &str = "kube-system";

/// Cluster object operations the reconciler and implementors depend on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Writes `address` to the Service's requested and reported load balancer address.
    async fn set_service_address(&self, namespace: &str, name: &str, address: &str)
    -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Names of nodes hosting a ready endpoint of the Service.
    async fn endpoint_nodes(&self, namespace: &str, name: &str) -> Result<Vec<String>>;

    async fn node_annotations(&self, name: &str) -> Result<BTreeMap<String, String>>;

    /// Names of nodes carrying an annotation whose key starts with `prefix`.
    async fn annotated_nodes(&self, prefix: &str) -> Result<Vec<String>>;

    /// Merges annotations onto a node. `None` values remove the key.
    async fn patch_node_annotations(
        &self,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn set_service_address(
        &self,
        namespace: &str,
        name: &str,
        address: &str,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let spec = json!({ "spec": { "loadBalancerIP": address } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&spec))
            .await?;
        let status = json!({
            "status": { "loadBalancer": { "ingress": [{ "ip": address }] } }
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status))
            .await?;
        debug!(namespace, name, address, "wrote service address");
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn endpoint_nodes(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let slices = api
            .list(&ListParams::default().labels(&format!("{SERVICE_NAME_LABEL}={name}")))
            .await?;
        Ok(ready_endpoint_nodes(&slices.items))
    }

    async fn node_annotations(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api
            .get_opt(name)
            .await?
            .map(|n| n.annotations().clone())
            .unwrap_or_default())
    }

    async fn annotated_nodes(&self, prefix: &str) -> Result<Vec<String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes
            .items
            .iter()
            .filter(|n| n.annotations().keys().any(|k| k.starts_with(prefix)))
            .map(|n| n.name_any())
            .collect())
    }

    async fn patch_node_annotations(
        &self,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let annotations: serde_json::Map<String, Value> = annotations
            .into_iter()
            .map(|(k, v)| (k, v.map(Value::String).unwrap_or(Value::Null)))
            .collect();
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::apply(MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Cluster identity used to tag owned reservations.
pub async fn cluster_id(client: &Client) -> Result<String> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = api.get(CLUSTER_ID_NAMESPACE).await?;
    Ok(namespace.uid().unwrap_or_default())
}

pub(crate) fn ready_endpoint_nodes(slices: &[EndpointSlice]) -> Vec<String> {
    let nodes: BTreeSet<String> = slices
        .iter()
        .flat_map(|s| s.endpoints.iter())
        .filter(|e| {
            e.conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true)
        })
        .filter_map(|e| e.node_name.clone())
        .collect();
    nodes.into_iter().collect()
}
