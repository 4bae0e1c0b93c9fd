use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use metal_ccm_metallb::crds::v1beta1::{BgpAdvertisement, IpAddressPool};
use metal_ccm_metallb::crds::v1beta2::BgpPeer;
use metal_ccm_metallb::{
    AddressPool, ConfigFile, MANAGED_BY, MANAGED_BY_LABEL, NodeSelector, Peer, Resource,
    from_resources, to_resources,
};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Implementor, NodePeering, NodePeers};
use crate::{MANAGER, Result};

const CONFIG_KEY: &str = "config";

/// Where the peer and pool document is persisted.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<ConfigFile>;

    async fn save(&self, config: &ConfigFile) -> Result<()>;
}

/// The document as YAML under the `config` key of a ConfigMap.
pub struct ConfigMapStore {
    client: Client,
    namespace: String,
    name: String,
}

impl ConfigMapStore {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ConfigStore for ConfigMapStore {
    async fn load(&self) -> Result<ConfigFile> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let raw = api
            .get_opt(&self.name)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(CONFIG_KEY))
            .unwrap_or_default();
        Ok(ConfigFile::parse(&raw)?)
    }

    async fn save(&self, config: &ConfigFile) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), config.to_yaml()?)])),
            ..Default::default()
        };
        api.patch(
            &self.name,
            &PatchParams::apply(MANAGER).force(),
            &Patch::Apply(&cm),
        )
        .await?;
        Ok(())
    }
}

/// The document as MetalLB `IPAddressPool`, `BGPAdvertisement` and `BGPPeer`
/// objects labelled as owned by this controller.
pub struct CrdStore {
    client: Client,
    namespace: String,
}

impl CrdStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn owned() -> ListParams {
    ListParams::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY}"))
}

async fn apply_owned<K>(api: &Api<K>, desired: Vec<K>) -> Result<()>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let params = PatchParams::apply(MANAGER).force();
    let names: BTreeSet<String> = desired.iter().map(|o| o.name_any()).collect();
    for object in desired {
        api.patch(&object.name_any(), &params, &Patch::Apply(&object))
            .await?;
    }
    for existing in api.list(&owned()).await?.items {
        let name = existing.name_any();
        if !names.contains(&name) {
            api.delete(&name, &DeleteParams::default()).await?;
            debug!(%name, kind = %K::kind(&()), "deleted stale metallb object");
        }
    }
    Ok(())
}

#[async_trait]
impl ConfigStore for CrdStore {
    async fn load(&self) -> Result<ConfigFile> {
        let pools = self.api::<IpAddressPool>().list(&owned()).await?;
        let ads = self.api::<BgpAdvertisement>().list(&owned()).await?;
        let peers = self.api::<BgpPeer>().list(&owned()).await?;
        Ok(from_resources(&pools.items, &ads.items, &peers.items))
    }

    async fn save(&self, config: &ConfigFile) -> Result<()> {
        let resources = to_resources(config, &self.namespace);
        // pools before the advertisements and peers that reference them
        apply_owned(&self.api::<IpAddressPool>(), resources.pools).await?;
        apply_owned(&self.api::<BgpAdvertisement>(), resources.advertisements).await?;
        apply_owned(&self.api::<BgpPeer>(), resources.peers).await?;
        Ok(())
    }
}

/// MetalLB backend. Every operation is a locked load, mutate, save cycle that
/// only writes when the document changed.
pub struct MetalLb {
    store: Arc<dyn ConfigStore>,
    /// Nodes registered through `add_node` or `sync_nodes`. Their peers outlive
    /// any service marker attached to them.
    nodes: Mutex<BTreeSet<String>>,
}

impl MetalLb {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            nodes: Mutex::new(BTreeSet::new()),
        }
    }

    async fn update<F>(&self, op: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ConfigFile, &mut BTreeSet<String>) -> bool + Send,
    {
        let mut nodes = self.nodes.lock().await;
        let mut config = self.store.load().await?;
        if !mutate(&mut config, &mut nodes) {
            debug!(op, "metallb config unchanged");
            return Ok(());
        }
        self.store.save(&config).await?;
        info!(op, "updated metallb config");
        Ok(())
    }
}

fn node_peers(node: &str, peering: &NodePeering) -> Vec<Peer> {
    peering
        .peer_ips
        .iter()
        .map(|ip| Peer {
            my_asn: peering.local_asn,
            asn: peering.peer_asn,
            addr: ip.clone(),
            src_addr: peering.source_ip.clone(),
            password: peering.password.clone(),
            node_selectors: vec![NodeSelector::hostname(node)],
            ..Default::default()
        })
        .collect()
}

/// Makes the peers pinned to `node` match `desired`. A desired peer already
/// present with service markers counts as present.
fn set_node_peers(config: &mut ConfigFile, node: &str, desired: &[Peer]) -> bool {
    let selector = NodeSelector::hostname(node);
    let before = config.peers.len();
    config.peers.retain(|p| {
        !p.has_selector(&selector) || desired.iter().any(|d| d.equal_ignore_service(p))
    });
    let mut changed = config.peers.len() != before;
    for peer in desired {
        if !config.peers.iter().any(|p| p.equal_ignore_service(peer)) {
            changed |= config.add_peer(peer);
        }
    }
    changed
}

/// Detaches `service` from every peer `release` selects. A peer left without
/// services is dropped unless it still peers a registered node.
fn detach_service<F>(
    config: &mut ConfigFile,
    service: &Resource,
    nodes: &BTreeSet<String>,
    release: F,
) -> bool
where
    F: Fn(&Peer) -> bool,
{
    let mut changed = false;
    config.peers.retain_mut(|p| {
        if !p.services().contains(service) || !release(p) {
            return true;
        }
        changed |= p.remove_service(&service.namespace, &service.name);
        !p.services().is_empty() || p.hostname().is_some_and(|host| nodes.contains(host))
    });
    changed
}

/// Services named by pools that hold `address`.
fn pool_services(config: &ConfigFile, address: &str) -> Vec<Resource> {
    config
        .pools
        .iter()
        .filter(|p| p.contains_address(address))
        .flat_map(|p| service_names(&p.name))
        .collect()
}

fn service_names(pool_name: &str) -> Vec<Resource> {
    pool_name
        .split(',')
        .filter_map(|n| n.split_once('/'))
        .map(|(ns, name)| Resource::new(ns, name))
        .collect()
}

#[async_trait]
impl Implementor for MetalLb {
    async fn add_service(&self, namespace: &str, name: &str, cidr: &str) -> Result<()> {
        let pool = AddressPool::for_address(format!("{namespace}/{name}"), cidr);
        self.update("add_service", |config, _| config.add_address_pool(&pool))
            .await
    }

    async fn remove_service(&self, cidr: &str) -> Result<()> {
        self.update("remove_service", |config, nodes| {
            let services = pool_services(config, cidr);
            let mut changed = config.remove_address_pool_by_address(cidr);
            for svc in services {
                changed |= detach_service(config, &svc, nodes, |_| true);
            }
            changed
        })
        .await
    }

    async fn update_service(&self, namespace: &str, name: &str, nodes: &NodePeers) -> Result<()> {
        let desired: Vec<Peer> = nodes
            .iter()
            .flat_map(|(node, peering)| node_peers(node, peering))
            .collect();
        let service = Resource::new(namespace, name);
        self.update("update_service", |config, registered| {
            let mut changed = detach_service(config, &service, registered, |p| {
                !desired.iter().any(|d| d.equal_ignore_service(p))
            });
            for peer in &desired {
                changed |= config.add_peer_by_service(peer, namespace, name);
            }
            changed
        })
        .await
    }

    async fn add_node(&self, name: &str, peering: &NodePeering) -> Result<()> {
        let desired = node_peers(name, peering);
        self.update("add_node", |config, nodes| {
            nodes.insert(name.to_string());
            set_node_peers(config, name, &desired)
        })
        .await
    }

    async fn remove_node(&self, name: &str) -> Result<()> {
        self.update("remove_node", |config, nodes| {
            nodes.remove(name);
            config.remove_peers_by_selector(&NodeSelector::hostname(name))
        })
        .await
    }

    async fn sync_nodes(&self, nodes: &NodePeers) -> Result<()> {
        self.update("sync_nodes", |config, registered| {
            *registered = nodes.keys().cloned().collect();
            let before = config.peers.len();
            config
                .peers
                .retain(|p| p.hostname().is_none_or(|host| nodes.contains_key(host)));
            let mut changed = config.peers.len() != before;
            for (node, peering) in nodes {
                changed |= set_node_peers(config, node, &node_peers(node, peering));
            }
            changed
        })
        .await
    }

    async fn sync_services(&self, valid: &[String]) -> Result<()> {
        self.update("sync_services", |config, nodes| {
            let stale: Vec<Resource> = config
                .pools
                .iter()
                .filter(|p| !valid.iter().any(|a| p.contains_address(a)))
                .flat_map(|p| service_names(&p.name))
                .collect();
            let mut changed = config.retain_pools_with_addresses(valid);
            for svc in stale {
                changed |= detach_service(config, &svc, nodes, |_| true);
            }
            changed
        })
        .await
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// In-memory document counting saves.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        config: Mutex<ConfigFile>,
        saves: AtomicUsize,
    }

    impl MemoryStore {
        pub(crate) fn config(&self) -> ConfigFile {
            self.config.lock().unwrap().clone()
        }

        pub(crate) fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConfigStore for MemoryStore {
        async fn load(&self) -> Result<ConfigFile> {
            Ok(self.config())
        }

        async fn save(&self, config: &ConfigFile) -> Result<()> {
            *self.config.lock().unwrap() = config.clone();
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::Error;

    fn peering(ips: &[&str]) -> NodePeering {
        NodePeering {
            local_asn: 65000,
            peer_asn: 65530,
            password: "secret".into(),
            source_ip: "10.66.4.131".into(),
            peer_ips: ips.iter().map(|ip| ip.to_string()).collect(),
        }
    }

    fn metallb() -> (Arc<MemoryStore>, MetalLb) {
        let store = Arc::new(MemoryStore::default());
        let metallb = MetalLb::new(store.clone());
        (store, metallb)
    }

    #[tokio::test]
    async fn add_service_only_saves_on_change() {
        let (store, metallb) = metallb();
        metallb
            .add_service("default", "web", "147.75.1.1/32")
            .await
            .unwrap();
        metallb
            .add_service("default", "web", "147.75.1.1/32")
            .await
            .unwrap();
        assert_eq!(store.saves(), 1);
        let config = store.config();
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].name, "default/web");
        assert_eq!(config.pools[0].auto_assign, Some(false));
    }

    #[tokio::test]
    async fn node_peers_converge() {
        let (store, metallb) = metallb();
        metallb
            .add_node("node-a", &peering(&["169.254.255.1", "169.254.255.2"]))
            .await
            .unwrap();
        metallb
            .add_node("node-b", &peering(&["169.254.255.1"]))
            .await
            .unwrap();
        assert_eq!(store.config().peers.len(), 3);

        metallb
            .add_node("node-a", &peering(&["169.254.255.1", "169.254.255.2"]))
            .await
            .unwrap();
        assert_eq!(store.saves(), 2);

        let nodes = NodePeers::from([("node-b".to_string(), peering(&["169.254.255.1"]))]);
        metallb.sync_nodes(&nodes).await.unwrap();
        let config = store.config();
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].hostname(), Some("node-b"));

        metallb.sync_nodes(&nodes).await.unwrap();
        assert_eq!(store.saves(), 3);

        metallb.remove_node("node-b").await.unwrap();
        assert!(store.config().peers.is_empty());
    }

    #[tokio::test]
    async fn update_service_attaches_and_detaches_nodes() {
        let (store, metallb) = metallb();
        let both = NodePeers::from([
            ("node-a".to_string(), peering(&["169.254.255.1"])),
            ("node-b".to_string(), peering(&["169.254.255.1"])),
        ]);
        metallb
            .update_service("default", "web", &both)
            .await
            .unwrap();
        let config = store.config();
        assert_eq!(config.peers.len(), 2);
        assert!(
            config
                .peers
                .iter()
                .all(|p| p.services() == vec![Resource::new("default", "web")])
        );

        let only_b = NodePeers::from([("node-b".to_string(), peering(&["169.254.255.1"]))]);
        metallb
            .update_service("default", "web", &only_b)
            .await
            .unwrap();
        let config = store.config();
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].hostname(), Some("node-b"));

        let saves = store.saves();
        metallb
            .update_service("default", "web", &only_b)
            .await
            .unwrap();
        assert_eq!(store.saves(), saves);
    }

    #[tokio::test]
    async fn node_peer_survives_service_leaving_node() {
        let (store, metallb) = metallb();
        let a = peering(&["169.254.255.1"]);
        metallb.add_node("node-a", &a).await.unwrap();
        let plain = store.config().peers;

        let on_a = NodePeers::from([("node-a".to_string(), a.clone())]);
        metallb
            .update_service("default", "web", &on_a)
            .await
            .unwrap();
        assert_eq!(store.config().peers.len(), 1);
        assert_eq!(
            store.config().peers[0].services(),
            vec![Resource::new("default", "web")]
        );

        metallb
            .update_service("default", "web", &NodePeers::new())
            .await
            .unwrap();
        let config = store.config();
        assert_eq!(config.node_peers("node-a").len(), 1);
        assert_eq!(config.peers, plain);
    }

    #[tokio::test]
    async fn removing_or_syncing_services_keeps_registered_node_peers() {
        let (store, metallb) = metallb();
        let a = peering(&["169.254.255.1"]);
        let on_a = NodePeers::from([("node-a".to_string(), a.clone())]);
        metallb.sync_nodes(&on_a).await.unwrap();

        metallb
            .add_service("default", "web", "147.75.1.1/32")
            .await
            .unwrap();
        metallb
            .update_service("default", "web", &on_a)
            .await
            .unwrap();
        metallb.remove_service("147.75.1.1/32").await.unwrap();
        let config = store.config();
        assert!(config.pools.is_empty());
        assert_eq!(config.node_peers("node-a").len(), 1);
        assert!(config.peers[0].services().is_empty());

        metallb
            .add_service("default", "api", "147.75.1.2/32")
            .await
            .unwrap();
        metallb
            .update_service("default", "api", &on_a)
            .await
            .unwrap();
        metallb.sync_services(&[]).await.unwrap();
        let config = store.config();
        assert!(config.pools.is_empty());
        assert_eq!(config.node_peers("node-a").len(), 1);
        assert!(config.peers[0].services().is_empty());

        metallb.remove_node("node-a").await.unwrap();
        assert!(store.config().peers.is_empty());
    }

    #[tokio::test]
    async fn remove_service_drops_pool_and_service_peers() {
        let (store, metallb) = metallb();
        metallb
            .add_service("default", "web", "147.75.1.1/32")
            .await
            .unwrap();
        let nodes = NodePeers::from([("node-a".to_string(), peering(&["169.254.255.1"]))]);
        metallb
            .update_service("default", "web", &nodes)
            .await
            .unwrap();

        metallb.remove_service("147.75.1.1/32").await.unwrap();
        let config = store.config();
        assert!(config.pools.is_empty());
        assert!(config.peers.is_empty());
    }

    #[tokio::test]
    async fn sync_services_drops_stale_pools() {
        let (store, metallb) = metallb();
        metallb
            .add_service("default", "web", "147.75.1.1/32")
            .await
            .unwrap();
        metallb
            .add_service("default", "api", "147.75.1.2/32")
            .await
            .unwrap();

        metallb
            .sync_services(&["147.75.1.2/32".to_string()])
            .await
            .unwrap();
        let config = store.config();
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].name, "default/api");
    }

    #[tokio::test]
    async fn save_failure_propagates() {
        let mut store = MockConfigStore::new();
        store.expect_load().returning(|| Ok(ConfigFile::default()));
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(Error::InvalidImplementation("boom".into())));

        let metallb = MetalLb::new(Arc::new(store));
        let err = metallb
            .add_service("default", "web", "147.75.1.1/32")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImplementation(_)));
    }

    #[tokio::test]
    async fn unchanged_document_is_not_saved() {
        let mut store = MockConfigStore::new();
        store.expect_load().returning(|| Ok(ConfigFile::default()));
        store.expect_save().never();

        let metallb = MetalLb::new(Arc::new(store));
        metallb.remove_node("node-a").await.unwrap();
        metallb.sync_services(&[]).await.unwrap();
    }

    #[test]
    fn merged_pool_names_map_to_services() {
        assert_eq!(
            service_names("default/web,prod/api"),
            vec![Resource::new("default", "web"), Resource::new("prod", "api")]
        );
        assert!(service_names("plain").is_empty());
    }
}
