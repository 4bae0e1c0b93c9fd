use std::sync::Arc;

use tracing::{debug, info};

use crate::types::{BgpConfigRequest, BgpNeighbor};
use crate::{Error, MetalApi, Result};

/// Idempotent BGP enablement for the project and its devices.
#[derive(Clone)]
pub struct BgpProvisioner {
    api: Arc<dyn MetalApi>,
    local_asn: u32,
    password: String,
}

impl BgpProvisioner {
    pub fn new(api: Arc<dyn MetalApi>, local_asn: u32, password: impl Into<String>) -> Self {
        Self {
            api,
            local_asn,
            password: password.into(),
        }
    }

    pub fn local_asn(&self) -> u32 {
        self.local_asn
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub async fn enable_project_bgp(&self) -> Result<()> {
        match self.api.get_project_bgp_config().await {
            Ok(config) if config.is_enabled() => {
                debug!(id = ?config.id, "project bgp already enabled");
                return Ok(());
            }
            Ok(config) => debug!(status = ?config.status, "project bgp not enabled"),
            Err(e) => debug!(%e, "failed to read project bgp config"),
        }

        let request = BgpConfigRequest {
            deployment_type: "local".into(),
            asn: self.local_asn,
            md5: (!self.password.is_empty()).then(|| self.password.clone()),
        };
        self.api.create_project_bgp_config(&request).await?;
        info!(asn = self.local_asn, "enabled project bgp");
        Ok(())
    }

    pub async fn ensure_node_bgp_enabled(&self, device_id: &str) -> Result<()> {
        match self.api.create_bgp_session(device_id).await {
            Ok(()) => {
                info!(device_id, "created bgp session");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(device_id, "bgp session already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_node_bgp_neighbor(&self, device_id: &str) -> Result<BgpNeighbor> {
        self.api
            .list_bgp_neighbors(device_id)
            .await?
            .into_iter()
            .find(|n| n.address_family == 4)
            .ok_or_else(|| Error::NoNeighbor(device_id.to_string()))
    }
}
