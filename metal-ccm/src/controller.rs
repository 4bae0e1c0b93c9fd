use std::sync::Arc;

use kube::Client;
use metal_ccm_controlplane::{
    ControlPlaneManager, HttpsProber, KubeControlPlaneClient, start_controlplane_controller,
};
use metal_ccm_loadbalancer::{
    ClusterClient, KubeClusterClient, Reconciler, cluster_id, implementor,
    start_loadbalancer_controller,
};
use metal_ccm_metal::{BgpProvisioner, MetalApi, MetalClient};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ControllerArgs;
use crate::{Error, Result};

/// Starts the load balancer and control plane controllers that `args`
/// enable. Cancels `ready` once both are running.
pub async fn start(
    args: ControllerArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let client = Client::try_default().await?;
    let metal: Arc<dyn MetalApi> = Arc::new(MetalClient::new(
        args.metal_api_url.as_str(),
        args.metal_auth_token.as_str(),
        args.project_id.as_str(),
    )?);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));
    match implementor(&args.load_balancer, client.clone(), cluster.clone(), args.metallb_crds) {
        Some(implementor) => {
            let cluster_id = match args.cluster_id.clone().filter(|id| !id.is_empty()) {
                Some(id) => id,
                None => cluster_id(&client).await?,
            };
            let bgp = BgpProvisioner::new(metal.clone(), args.local_asn, args.bgp_pass.as_str());
            let reconciler = Reconciler::new(metal.clone(), bgp, cluster, implementor, cluster_id)
                .with_location(args.metro.clone(), args.facility.clone());
            info!(implementation = %args.load_balancer, "load balancer enabled");
            let (client, cancel) = (client.clone(), cancel.child_token());
            tasks.spawn(async move {
                start_loadbalancer_controller(client, Arc::new(reconciler), cancel).await?;
                Ok(())
            });
        }
        None => info!("load balancer disabled"),
    }

    if args.eip_tag.is_empty() {
        info!("control plane failover disabled");
    } else {
        let manager = ControlPlaneManager::new(
            metal.clone(),
            Arc::new(KubeControlPlaneClient::new(client.clone())),
            Arc::new(HttpsProber::new()?),
            args.eip_tag.as_str(),
        )
        .with_api_server_port(args.api_server_port)
        .with_host_ip_health_check(args.eip_health_check_use_host_ip);
        info!(tag = %args.eip_tag, "control plane failover enabled");
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            start_controlplane_controller(client, Arc::new(manager), cancel).await?;
            Ok(())
        });
    }

    ready.cancel();
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(%e, "controller failed");
                cancel.cancel();
                return Err(e);
            }
            Err(e) => {
                cancel.cancel();
                return Err(Error::Task(e.to_string()));
            }
        }
    }
    Ok(())
}
