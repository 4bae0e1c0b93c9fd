use async_trait::async_trait;
use tracing::debug;

use super::{Implementor, NodePeering, NodePeers};
use crate::Result;

/// BGP only. Nodes still get sessions enabled by the reconciler but nothing
/// is written for a speaker.
pub struct Empty;

#[async_trait]
impl Implementor for Empty {
    async fn add_service(&self, namespace: &str, name: &str, cidr: &str) -> Result<()> {
        debug!(namespace, name, cidr, "no load balancer configured for service");
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

    async fn add_node(&self, _name: &str, _peering: &NodePeering) -> Result<()> {
        Ok(())
    }

    async fn remove_node(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn sync_nodes(&self, _nodes: &NodePeers) -> Result<()> {
        Ok(())
    }

    async fn sync_services(&self, _valid: &[String]) -> Result<()> {
        Ok(())
    }
}
