use serde::{Deserialize, Serialize};

use crate::selector::{NodeSelector, Resource, selectors_equal};

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// A BGP session definition. Node selectors are an unordered set for
/// equality; service marker selectors ride along in the same list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "my-asn")]
    pub my_asn: u32,
    #[serde(rename = "peer-asn")]
    pub asn: u32,
    #[serde(rename = "peer-address")]
    pub addr: String,
    #[serde(rename = "source-address", default, skip_serializing_if = "String::is_empty")]
    pub src_addr: String,
    #[serde(rename = "peer-port", default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(rename = "hold-time", default, skip_serializing_if = "String::is_empty")]
    pub hold_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(rename = "router-id", default, skip_serializing_if = "String::is_empty")]
    pub router_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "node-selectors", default, skip_serializing_if = "Vec::is_empty")]
    pub node_selectors: Vec<NodeSelector>,
}

impl Peer {
    fn scalars_equal(&self, other: &Peer) -> bool {
        self.my_asn == other.my_asn
            && self.asn == other.asn
            && self.addr == other.addr
            && self.src_addr == other.src_addr
            && self.port == other.port
            && self.hold_time == other.hold_time
            && self.password == other.password
            && self.router_id == other.router_id
            && self.name == other.name
    }

    /// Equality that disregards service marker selectors on both sides.
    pub fn equal_ignore_service(&self, other: &Peer) -> bool {
        self.scalars_equal(other)
            && selectors_equal(
                self.node_selectors.iter().filter(|s| !s.is_service_marker()),
                other.node_selectors.iter().filter(|s| !s.is_service_marker()),
            )
    }

    /// Services this peer currently serves, in selector order.
    pub fn services(&self) -> Vec<Resource> {
        self.node_selectors
            .iter()
            .filter_map(NodeSelector::service)
            .collect()
    }

    pub fn has_selector(&self, selector: &NodeSelector) -> bool {
        self.node_selectors.iter().any(|s| s == selector)
    }

    /// Attaches the marker for `namespace/name`; false when already attached.
    pub fn add_service(&mut self, namespace: &str, name: &str) -> bool {
        let marker = NodeSelector::for_service(namespace, name);
        if self.has_selector(&marker) {
            return false;
        }
        self.node_selectors.push(marker);
        true
    }

    /// Detaches the marker for `namespace/name`; false when it was not attached.
    pub fn remove_service(&mut self, namespace: &str, name: &str) -> bool {
        let marker = NodeSelector::for_service(namespace, name);
        let before = self.node_selectors.len();
        self.node_selectors.retain(|s| *s != marker);
        self.node_selectors.len() != before
    }

    /// Node name of the first plain hostname selector.
    pub fn hostname(&self) -> Option<&str> {
        self.node_selectors.iter().find_map(NodeSelector::hostname_value)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.scalars_equal(other) && selectors_equal(&self.node_selectors, &other.node_selectors)
    }
}

impl Eq for Peer {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorRequirements;

    fn peer() -> Peer {
        Peer {
            my_asn: 65000,
            asn: 65530,
            addr: "169.254.255.1".into(),
            src_addr: "10.66.4.131".into(),
            port: 179,
            hold_time: "90s".into(),
            password: "secret".into(),
            router_id: "10.0.0.1".into(),
            name: None,
            node_selectors: vec![
                NodeSelector::hostname("node-a"),
                NodeSelector {
                    match_expressions: vec![SelectorRequirements {
                        key: "zone".into(),
                        operator: "In".into(),
                        values: vec!["da".into(), "sv".into()],
                    }],
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn selector_order_does_not_matter() {
        let a = peer();
        let mut b = peer();
        b.node_selectors.reverse();
        b.node_selectors[0].match_expressions[0].values.reverse();
        assert_eq!(a, b);
    }

    #[test]
    fn any_scalar_change_breaks_equality() {
        let base = peer();
        let mutations: Vec<fn(&mut Peer)> = vec![
            |p: &mut Peer| p.my_asn = 1,
            |p: &mut Peer| p.asn = 1,
            |p: &mut Peer| p.addr = "169.254.255.2".into(),
            |p: &mut Peer| p.src_addr = "10.0.0.9".into(),
            |p: &mut Peer| p.port = 1179,
            |p: &mut Peer| p.hold_time = "30s".into(),
            |p: &mut Peer| p.password = "other".into(),
            |p: &mut Peer| p.router_id = "10.0.0.2".into(),
            |p: &mut Peer| p.name = Some("named".into()),
        ];
        for mutate in mutations {
            let mut changed = peer();
            mutate(&mut changed);
            assert_ne!(base, changed);
        }
    }

    #[test]
    fn selector_content_matters() {
        let mut changed = peer();
        changed.node_selectors[0] = NodeSelector::hostname("node-b");
        assert_ne!(peer(), changed);
    }

    #[test]
    fn equal_ignore_service_skips_markers() {
        let plain = peer();
        let mut marked = peer();
        assert!(marked.add_service("default", "web"));
        assert!(!marked.add_service("default", "web"));
        assert_ne!(plain, marked);
        assert!(plain.equal_ignore_service(&marked));
        assert!(marked.equal_ignore_service(&plain));
        assert_eq!(marked.services(), vec![Resource::new("default", "web")]);

        assert!(marked.remove_service("default", "web"));
        assert!(!marked.remove_service("default", "web"));
        assert_eq!(plain, marked);
    }

    #[test]
    fn hostname_from_selectors() {
        assert_eq!(peer().hostname(), Some("node-a"));
        assert_eq!(Peer::default().hostname(), None);
    }
}
