use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use metal_ccm_k8s_utils::{Change, ControllerMetrics, dispatch_changes};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::reconciler::{Mode, Reconciler};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Enables project BGP, then reconciles Nodes, Services and EndpointSlices
/// until `cancel` fires.
pub async fn start_loadbalancer_controller(
    client: Client,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
) -> Result<()> {
    reconciler.bgp().enable_project_bgp().await?;
    let metrics = ControllerMetrics::new("loadbalancer");

    let nodes = {
        let reconciler = reconciler.clone();
        dispatch_changes(
            Api::<Node>::all(client.clone()),
            Config::default(),
            metrics.clone(),
            move |change| {
                let reconciler = reconciler.clone();
                async move {
                    match change {
                        Change::Applied(node) => reconciler.reconcile_nodes(&[node], Mode::Add).await,
                        Change::Deleted(node) => {
                            reconciler.reconcile_nodes(&[node], Mode::Remove).await
                        }
                        Change::Resynced(nodes) => {
                            reconciler.reconcile_nodes(&nodes, Mode::Sync).await
                        }
                    }
                }
            },
            cancel.clone(),
        )
    };

    let services = {
        let reconciler = reconciler.clone();
        dispatch_changes(
            Api::<Service>::all(client.clone()),
            Config::default(),
            metrics.clone(),
            move |change| {
                let reconciler = reconciler.clone();
                async move {
                    match change {
                        Change::Applied(svc) => {
                            reconciler.reconcile_services(&[svc], Mode::Add).await
                        }
                        Change::Deleted(svc) => {
                            reconciler.reconcile_services(&[svc], Mode::Remove).await
                        }
                        Change::Resynced(svcs) => {
                            reconciler.reconcile_services(&svcs, Mode::Sync).await
                        }
                    }
                }
            },
            cancel.clone(),
        )
    };

    // Full resyncs are covered by the Service watch.
    let slices = dispatch_changes(
        Api::<EndpointSlice>::all(client),
        Config::default().labels(SERVICE_NAME_LABEL),
        metrics,
        move |change| {
            let reconciler = reconciler.clone();
            async move {
                match change {
                    Change::Applied(slice) | Change::Deleted(slice) => {
                        reconciler.reconcile_endpoint_slice(&slice).await
                    }
                    Change::Resynced(_) => Ok(()),
                }
            }
        },
        cancel,
    );

    info!("starting load balancer controller");
    tokio::join!(nodes, services, slices);
    info!("load balancer controller stopped");
    Ok(())
}
