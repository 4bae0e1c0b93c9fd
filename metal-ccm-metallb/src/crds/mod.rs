//! MetalLB custom resources and the mapping between them and [`ConfigFile`].
//!
//! Pools map one to one onto `IPAddressPool` objects. Each pool advertisement
//! becomes a `BGPAdvertisement` referencing its pool, and a pool without any
//! gets a single empty advertisement so MetalLB still announces it. Names that
//! are not valid object names are slugged and the original kept in an
//! annotation.

pub mod v1beta1;
pub mod v1beta2;

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::peer::Peer;
use crate::pool::{AddressPool, BgpAdvertisement as Advertisement, PROTOCOL_BGP};
use crate::selector::{NodeSelector, SelectorRequirements};
use crate::{ConfigFile, MANAGED_BY, MANAGED_BY_LABEL};

use v1beta1::{BgpAdvertisement, BgpAdvertisementSpec, IpAddressPool, IpAddressPoolSpec};
use v1beta2::{BgpPeer, BgpPeerSpec};

pub const POOL_NAME_ANNOTATION: &str = "metal.equinix.com/address-pool-name";
pub const PEER_NAME_ANNOTATION: &str = "metal.equinix.com/peer-name";
pub const DEFAULT_ADVERTISEMENT_ANNOTATION: &str = "metal.equinix.com/default-advertisement";

const MAX_NAME_LEN: usize = 63;

#[derive(Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug, JsonSchema)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl From<&NodeSelector> for LabelSelector {
    fn from(selector: &NodeSelector) -> Self {
        Self {
            match_labels: selector.match_labels.clone(),
            match_expressions: selector
                .match_expressions
                .iter()
                .map(|r| LabelSelectorRequirement {
                    key: r.key.clone(),
                    operator: r.operator.clone(),
                    values: r.values.clone(),
                })
                .collect(),
        }
    }
}

impl From<&LabelSelector> for NodeSelector {
    fn from(selector: &LabelSelector) -> Self {
        Self {
            match_labels: selector.match_labels.clone(),
            match_expressions: selector
                .match_expressions
                .iter()
                .map(|r| SelectorRequirements {
                    key: r.key.clone(),
                    operator: r.operator.clone(),
                    values: r.values.clone(),
                })
                .collect(),
        }
    }
}

/// The typed objects describing one [`ConfigFile`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resources {
    pub pools: Vec<IpAddressPool>,
    pub advertisements: Vec<BgpAdvertisement>,
    pub peers: Vec<BgpPeer>,
}

pub fn to_resources(config: &ConfigFile, namespace: &str) -> Resources {
    let mut resources = Resources::default();

    for pool in &config.pools {
        let pool_name = object_name(&pool.name);
        let mut annotations = BTreeMap::new();
        if pool_name != pool.name {
            annotations.insert(POOL_NAME_ANNOTATION.to_string(), pool.name.clone());
        }
        resources.pools.push(IpAddressPool {
            metadata: metadata(&pool_name, namespace, annotations),
            spec: IpAddressPoolSpec {
                addresses: pool.addresses.clone(),
                auto_assign: pool.auto_assign,
                avoid_buggy_ips: pool.avoid_buggy_ips.then_some(true),
            },
        });

        if pool.bgp_advertisements.is_empty() {
            let annotations = BTreeMap::from([(
                DEFAULT_ADVERTISEMENT_ANNOTATION.to_string(),
                "true".to_string(),
            )]);
            resources.advertisements.push(BgpAdvertisement {
                metadata: metadata(&pool_name, namespace, annotations),
                spec: BgpAdvertisementSpec {
                    ip_address_pools: vec![pool_name.clone()],
                    ..Default::default()
                },
            });
            continue;
        }
        for (i, ad) in pool.bgp_advertisements.iter().enumerate() {
            resources.advertisements.push(BgpAdvertisement {
                metadata: metadata(&child_name(&pool_name, &i.to_string()), namespace, BTreeMap::new()),
                spec: BgpAdvertisementSpec {
                    aggregation_length: ad.aggregation_length.map(i32::from),
                    local_pref: ad.local_pref,
                    communities: ad
                        .communities
                        .iter()
                        .map(|c| config.bgp_communities.get(c).unwrap_or(c).clone())
                        .collect(),
                    ip_address_pools: vec![pool_name.clone()],
                    node_selectors: vec![],
                },
            });
        }
    }

    let mut taken = BTreeSet::new();
    for peer in &config.peers {
        let mut name = peer_name(peer);
        let mut suffix = 1;
        while taken.contains(&name) {
            name = child_name(&peer_name(peer), &suffix.to_string());
            suffix += 1;
        }
        taken.insert(name.clone());

        let mut annotations = BTreeMap::new();
        if let Some(original) = &peer.name {
            annotations.insert(PEER_NAME_ANNOTATION.to_string(), original.clone());
        }
        resources.peers.push(BgpPeer {
            metadata: metadata(&name, namespace, annotations),
            spec: BgpPeerSpec {
                my_asn: peer.my_asn,
                peer_asn: peer.asn,
                peer_address: peer.addr.clone(),
                source_address: non_empty(&peer.src_addr),
                peer_port: (peer.port != 0).then_some(peer.port),
                hold_time: non_empty(&peer.hold_time),
                router_id: non_empty(&peer.router_id),
                password: non_empty(&peer.password),
                node_selectors: peer.node_selectors.iter().map(LabelSelector::from).collect(),
            },
        });
    }

    resources
}

/// Rebuilds the document from objects previously written by [`to_resources`].
/// Community aliases come back as their literal values.
pub fn from_resources(
    pools: &[IpAddressPool],
    advertisements: &[BgpAdvertisement],
    peers: &[BgpPeer],
) -> ConfigFile {
    let mut config = ConfigFile::default();

    let mut pools: Vec<&IpAddressPool> = pools.iter().collect();
    pools.sort_by_key(|p| p.name_any());
    for pool in pools {
        let object = pool.name_any();
        let mut ads: Vec<&BgpAdvertisement> = advertisements
            .iter()
            .filter(|a| a.spec.ip_address_pools.contains(&object))
            .filter(|a| !a.annotations().contains_key(DEFAULT_ADVERTISEMENT_ANNOTATION))
            .collect();
        ads.sort_by_key(|a| a.name_any());

        config.pools.push(AddressPool {
            protocol: PROTOCOL_BGP.into(),
            name: pool
                .annotations()
                .get(POOL_NAME_ANNOTATION)
                .cloned()
                .unwrap_or(object),
            addresses: pool.spec.addresses.clone(),
            avoid_buggy_ips: pool.spec.avoid_buggy_ips.unwrap_or(false),
            auto_assign: pool.spec.auto_assign,
            bgp_advertisements: ads
                .into_iter()
                .map(|a| Advertisement {
                    aggregation_length: a
                        .spec
                        .aggregation_length
                        .and_then(|l| u8::try_from(l).ok()),
                    local_pref: a.spec.local_pref,
                    communities: a.spec.communities.clone(),
                })
                .collect(),
        });
    }

    let mut peers: Vec<&BgpPeer> = peers.iter().collect();
    peers.sort_by_key(|p| p.name_any());
    for peer in peers {
        config.peers.push(Peer {
            my_asn: peer.spec.my_asn,
            asn: peer.spec.peer_asn,
            addr: peer.spec.peer_address.clone(),
            src_addr: peer.spec.source_address.clone().unwrap_or_default(),
            port: peer.spec.peer_port.unwrap_or(0),
            hold_time: peer.spec.hold_time.clone().unwrap_or_default(),
            password: peer.spec.password.clone().unwrap_or_default(),
            router_id: peer.spec.router_id.clone().unwrap_or_default(),
            name: peer.annotations().get(PEER_NAME_ANNOTATION).cloned(),
            node_selectors: peer.spec.node_selectors.iter().map(NodeSelector::from).collect(),
        });
    }

    config
}

fn metadata(name: &str, namespace: &str, annotations: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY.to_string(),
        )])),
        annotations: (!annotations.is_empty()).then_some(annotations),
        ..Default::default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn short_hash(value: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(value.as_bytes()));
    digest[..10].to_string()
}

fn is_object_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

/// `name` itself when it is a valid object name, otherwise a slug of it
/// suffixed with a digest of the original.
pub fn object_name(name: &str) -> String {
    if is_object_name(name) {
        return name.to_string();
    }
    let slug: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let hash = short_hash(name);
    let keep = MAX_NAME_LEN - hash.len() - 1;
    let slug = slug.get(..keep.min(slug.len())).unwrap_or(slug).trim_end_matches('-');
    if slug.is_empty() {
        return format!("pool-{hash}");
    }
    format!("{slug}-{hash}")
}

/// `base-suffix`, shortening `base` and marking it with its digest when the
/// result would exceed the object name limit.
fn child_name(base: &str, suffix: &str) -> String {
    let name = format!("{base}-{suffix}");
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let hash = short_hash(base);
    let keep = MAX_NAME_LEN.saturating_sub(hash.len() + suffix.len() + 2);
    let head = base
        .get(..keep)
        .unwrap_or(base)
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    format!("{head}-{hash}-{suffix}")
}

/// Stable peer object name derived from everything but service markers, so
/// attaching services does not rename the object.
fn peer_name(peer: &Peer) -> String {
    let mut selectors: Vec<_> = peer
        .node_selectors
        .iter()
        .filter(|s| !s.is_service_marker())
        .map(NodeSelector::canonical_key)
        .collect();
    selectors.sort();
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}|{:?}",
        peer.my_asn,
        peer.asn,
        peer.addr,
        peer.src_addr,
        peer.port,
        peer.router_id,
        peer.name.as_deref().unwrap_or_default(),
        selectors
    );
    match peer.hostname() {
        Some(host) => object_name(&format!("{}-{}", host, short_hash(&canonical))),
        None => format!("peer-{}", short_hash(&canonical)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfigFile {
        let mut config = ConfigFile::default();
        let mut peer = Peer {
            my_asn: 65000,
            asn: 65530,
            addr: "169.254.255.1".into(),
            src_addr: "10.66.4.131".into(),
            port: 179,
            hold_time: "90s".into(),
            password: "secret".into(),
            node_selectors: vec![NodeSelector::hostname("node-a")],
            ..Default::default()
        };
        config.add_peer(&peer);
        peer.addr = "169.254.255.2".into();
        config.add_peer_by_service(&peer, "default", "web");

        config.add_address_pool(&AddressPool::for_address("default/web", "147.75.1.1/32"));
        let mut with_ads = AddressPool::for_address("plain", "147.75.1.2/32");
        with_ads.bgp_advertisements = vec![
            Advertisement {
                aggregation_length: Some(32),
                local_pref: Some(100),
                communities: vec!["65535:65282".into()],
            },
            Advertisement {
                aggregation_length: Some(24),
                ..Default::default()
            },
        ];
        config.add_address_pool(&with_ads);
        config
    }

    #[test]
    fn document_survives_resource_round_trip() {
        let config = config();
        let resources = to_resources(&config, "metallb-system");
        assert_eq!(resources.pools.len(), 2);
        assert_eq!(resources.advertisements.len(), 3);
        assert_eq!(resources.peers.len(), 2);

        let back = from_resources(
            &resources.pools,
            &resources.advertisements,
            &resources.peers,
        );
        assert_eq!(back.pools.len(), config.pools.len());
        for pool in &config.pools {
            assert!(back.pools.contains(pool), "missing pool {}", pool.name);
        }
        for peer in &config.peers {
            assert!(back.peers.contains(peer), "missing peer {}", peer.addr);
        }
    }

    #[test]
    fn resources_are_labelled_and_namespaced() {
        let resources = to_resources(&config(), "metallb-system");
        for pool in &resources.pools {
            assert_eq!(pool.namespace().as_deref(), Some("metallb-system"));
            assert_eq!(
                pool.labels().get(MANAGED_BY_LABEL).map(String::as_str),
                Some(MANAGED_BY)
            );
        }
        let web = resources
            .pools
            .iter()
            .find(|p| p.spec.addresses == vec!["147.75.1.1/32".to_string()])
            .unwrap();
        assert!(is_object_name(&web.name_any()));
        assert_eq!(
            web.annotations().get(POOL_NAME_ANNOTATION).map(String::as_str),
            Some("default/web")
        );
    }

    #[test]
    fn community_aliases_are_resolved() {
        let mut config = ConfigFile::default();
        config
            .bgp_communities
            .insert("no-advertise".into(), "65535:65282".into());
        let mut pool = AddressPool::for_address("a", "147.75.1.1/32");
        pool.bgp_advertisements.push(Advertisement {
            communities: vec!["no-advertise".into(), "65000:1".into()],
            ..Default::default()
        });
        config.add_address_pool(&pool);

        let resources = to_resources(&config, "metallb-system");
        assert_eq!(
            resources.advertisements[0].spec.communities,
            vec!["65535:65282".to_string(), "65000:1".to_string()]
        );
    }

    #[test]
    fn object_names_are_valid_and_distinct() {
        assert_eq!(object_name("web"), "web");
        let a = object_name("default/web");
        let b = object_name("default-web,other");
        assert!(is_object_name(&a));
        assert!(is_object_name(&b));
        assert!(a.starts_with("default-web-"));
        assert_ne!(a, b);
        assert!(is_object_name(&object_name(&"X".repeat(200))));
        assert!(is_object_name(&object_name("///")));
    }

    #[test]
    fn advertisement_names_fit_for_long_pool_names() {
        let ad = |pref| Advertisement {
            local_pref: Some(pref),
            ..Default::default()
        };
        let mut config = ConfigFile::default();
        for name in ["a".repeat(MAX_NAME_LEN), "Default/".repeat(20)] {
            config.pools.push(AddressPool {
                protocol: PROTOCOL_BGP.into(),
                name,
                addresses: vec!["147.75.1.1/32".into()],
                bgp_advertisements: vec![ad(100), ad(200)],
                ..Default::default()
            });
        }

        let resources = to_resources(&config, "metallb-system");
        let names: BTreeSet<String> = resources
            .advertisements
            .iter()
            .map(|a| a.name_any())
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| is_object_name(n)), "{names:?}");

        let back = from_resources(&resources.pools, &resources.advertisements, &resources.peers);
        assert!(back.pools.iter().all(|p| p.bgp_advertisements.len() == 2));
    }

    #[test]
    fn child_names_keep_short_bases() {
        assert_eq!(child_name("web", "0"), "web-0");
        let long = child_name(&"b".repeat(MAX_NAME_LEN), "12");
        assert!(long.len() <= MAX_NAME_LEN);
        assert!(long.ends_with("-12"));
        assert_ne!(long, child_name(&format!("{}c", "b".repeat(MAX_NAME_LEN - 1)), "12"));
    }

    #[test]
    fn peer_names_ignore_service_markers() {
        let mut peer = Peer {
            my_asn: 65000,
            asn: 65530,
            addr: "169.254.255.1".into(),
            node_selectors: vec![NodeSelector::hostname("node-a")],
            ..Default::default()
        };
        let plain = peer_name(&peer);
        peer.add_service("default", "web");
        assert_eq!(peer_name(&peer), plain);
        assert!(plain.starts_with("node-a-"));

        peer.node_selectors[0] = NodeSelector::hostname("node-b");
        assert_ne!(peer_name(&peer), plain);
    }

    #[test]
    fn duplicate_peer_names_get_suffixes() {
        let mut config = ConfigFile::default();
        let peer = Peer {
            my_asn: 65000,
            asn: 65530,
            addr: "169.254.255.1".into(),
            ..Default::default()
        };
        let mut marked = peer.clone();
        marked.add_service("default", "web");
        config.peers = vec![peer, marked];

        let resources = to_resources(&config, "metallb-system");
        let names: BTreeSet<String> = resources.peers.iter().map(|p| p.name_any()).collect();
        assert_eq!(names.len(), 2);
    }
}
