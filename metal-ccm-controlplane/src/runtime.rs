use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use metal_ccm_k8s_utils::{Change, ControllerMetrics, dispatch_changes, is_control_plane};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::manager::ControlPlaneManager;
use crate::mirror::{SERVICE_NAME_LABEL, SOURCE_NAME, SOURCE_NAMESPACE};

/// Runs the failover manager against Node events and the `default/kubernetes`
/// Service and EndpointSlice until `cancel` fires.
pub async fn start_controlplane_controller(
    client: Client,
    manager: Arc<ControlPlaneManager>,
    cancel: CancellationToken,
) -> Result<()> {
    let metrics = ControllerMetrics::new("controlplane");

    let nodes = {
        let manager = manager.clone();
        dispatch_changes(
            Api::<Node>::all(client.clone()),
            Config::default(),
            metrics.clone(),
            move |change| {
                let manager = manager.clone();
                async move {
                    match change {
                        Change::Applied(node) => manager.handle_node(&node).await,
                        Change::Deleted(node) => manager.handle_node_deleted(&node).await,
                        Change::Resynced(nodes) => {
                            for node in nodes.iter().filter(|n| is_control_plane(n)) {
                                if let Err(e) = manager.handle_node(node).await {
                                    warn!(node = %node.name_any(), %e, "control plane resync failed");
                                }
                            }
                            Ok(())
                        }
                    }
                }
            },
            cancel.clone(),
        )
    };

    let services = {
        let manager = manager.clone();
        dispatch_changes(
            Api::<Service>::namespaced(client.clone(), SOURCE_NAMESPACE),
            Config::default().fields(&format!("metadata.name={SOURCE_NAME}")),
            metrics.clone(),
            move |change| {
                let manager = manager.clone();
                async move {
                    match change {
                        Change::Applied(svc) => manager.sync_service(&svc).await,
                        Change::Resynced(svcs) => {
                            for svc in &svcs {
                                manager.sync_service(svc).await?;
                            }
                            Ok(())
                        }
                        Change::Deleted(_) => Ok(()),
                    }
                }
            },
            cancel.clone(),
        )
    };

    let slices = dispatch_changes(
        Api::<EndpointSlice>::namespaced(client, SOURCE_NAMESPACE),
        Config::default().labels(&format!("{SERVICE_NAME_LABEL}={SOURCE_NAME}")),
        metrics,
        move |change| {
            let manager = manager.clone();
            async move {
                match change {
                    Change::Applied(slice) => manager.sync_endpoints(&slice).await,
                    Change::Resynced(slices) => {
                        for slice in &slices {
                            manager.sync_endpoints(slice).await?;
                        }
                        Ok(())
                    }
                    Change::Deleted(_) => Ok(()),
                }
            }
        },
        cancel,
    );

    info!("starting control plane controller");
    tokio::join!(nodes, services, slices);
    info!("control plane controller stopped");
    Ok(())
}
