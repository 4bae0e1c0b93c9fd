use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::peer::Peer;
use crate::pool::AddressPool;
use crate::selector::NodeSelector;

/// The BGP peer and address pool document MetalLB consumes. All mutation
/// methods report whether anything changed so callers only persist real edits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<Peer>,
    #[serde(rename = "bgp-communities", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bgp_communities: BTreeMap<String, String>,
    #[serde(rename = "address-pools", default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<AddressPool>,
}

impl ConfigFile {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn add_peer(&mut self, peer: &Peer) -> bool {
        if self.peers.iter().any(|p| p == peer) {
            return false;
        }
        self.peers.push(peer.clone());
        true
    }

    pub fn remove_peer(&mut self, peer: &Peer) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p != peer);
        self.peers.len() != before
    }

    /// Marks an existing equivalent peer as serving `namespace/name`, or adds
    /// `peer` with that marker when no equivalent exists.
    pub fn add_peer_by_service(&mut self, peer: &Peer, namespace: &str, name: &str) -> bool {
        if let Some(existing) = self
            .peers
            .iter_mut()
            .find(|p| p.equal_ignore_service(peer))
        {
            return existing.add_service(namespace, name);
        }
        let mut peer = peer.clone();
        peer.add_service(namespace, name);
        self.peers.push(peer);
        true
    }

    /// Detaches `namespace/name` from every peer. A peer whose last service
    /// marker was removed here is dropped.
    pub fn remove_peers_by_service(&mut self, namespace: &str, name: &str) -> bool {
        let mut changed = false;
        self.peers.retain_mut(|p| {
            if !p.remove_service(namespace, name) {
                return true;
            }
            changed = true;
            !p.services().is_empty()
        });
        changed
    }

    pub fn remove_peers_by_selector(&mut self, selector: &NodeSelector) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| !p.has_selector(selector));
        self.peers.len() != before
    }

    /// Adds `pool`. A pool describing the same addresses under another name is
    /// renamed to the merged name list instead of being duplicated.
    pub fn add_address_pool(&mut self, pool: &AddressPool) -> bool {
        if self.pools.iter().any(|p| p == pool) {
            return false;
        }
        if let Some(existing) = self
            .pools
            .iter_mut()
            .find(|p| p.equal_ignoring_name(pool))
        {
            return existing.merge_name(&pool.name);
        }
        self.pools.push(pool.clone());
        true
    }

    pub fn remove_address_pool(&mut self, pool: &AddressPool) -> bool {
        let before = self.pools.len();
        self.pools.retain(|p| p != pool);
        self.pools.len() != before
    }

    pub fn remove_address_pool_by_address(&mut self, address: &str) -> bool {
        let before = self.pools.len();
        self.pools.retain(|p| !p.contains_address(address));
        self.pools.len() != before
    }

    /// Drops every pool none of whose addresses appear in `valid`.
    pub fn retain_pools_with_addresses(&mut self, valid: &[String]) -> bool {
        let before = self.pools.len();
        self.pools
            .retain(|p| valid.iter().any(|address| p.contains_address(address)));
        self.pools.len() != before
    }

    /// Peers pinned to a node through a hostname selector, by node name.
    pub fn node_peers(&self, node: &str) -> Vec<&Peer> {
        let selector = NodeSelector::hostname(node);
        self.peers
            .iter()
            .filter(|p| p.has_selector(&selector))
            .collect()
    }
}
