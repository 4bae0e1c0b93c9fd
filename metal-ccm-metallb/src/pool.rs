use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_BGP: &str = "bgp";

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BgpAdvertisement {
    #[serde(rename = "aggregation-length", default, skip_serializing_if = "Option::is_none")]
    pub aggregation_length: Option<u8>,
    #[serde(rename = "localpref", default, skip_serializing_if = "Option::is_none")]
    pub local_pref: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communities: Vec<String>,
}

type AdvertisementKey<'a> = (Option<u8>, Option<u32>, Vec<&'a str>);

impl BgpAdvertisement {
    fn canonical_key(&self) -> AdvertisementKey<'_> {
        (
            self.aggregation_length,
            self.local_pref,
            sorted(&self.communities),
        )
    }
}

impl PartialEq for BgpAdvertisement {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for BgpAdvertisement {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddressPool {
    pub protocol: String,
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(rename = "avoid-buggy-ips", default, skip_serializing_if = "is_false")]
    pub avoid_buggy_ips: bool,
    #[serde(rename = "auto-assign", default, skip_serializing_if = "Option::is_none")]
    pub auto_assign: Option<bool>,
    #[serde(rename = "bgp-advertisements", default, skip_serializing_if = "Vec::is_empty")]
    pub bgp_advertisements: Vec<BgpAdvertisement>,
}

impl AddressPool {
    /// Single address BGP pool that MetalLB must never hand out on its own.
    pub fn for_address(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            protocol: PROTOCOL_BGP.into(),
            name: name.into(),
            addresses: vec![cidr.into()],
            auto_assign: Some(false),
            ..Default::default()
        }
    }

    /// Everything except the name matches.
    pub fn equal_ignoring_name(&self, other: &AddressPool) -> bool {
        if self.protocol != other.protocol
            || self.avoid_buggy_ips != other.avoid_buggy_ips
            || self.auto_assign != other.auto_assign
            || sorted(&self.addresses) != sorted(&other.addresses)
        {
            return false;
        }
        let mut a: Vec<_> = self
            .bgp_advertisements
            .iter()
            .map(BgpAdvertisement::canonical_key)
            .collect();
        let mut b: Vec<_> = other
            .bgp_advertisements
            .iter()
            .map(BgpAdvertisement::canonical_key)
            .collect();
        a.sort();
        b.sort();
        a == b
    }

    /// Whether any entry of the pool covers exactly `address`. A bare IP is
    /// treated as a host prefix.
    pub fn contains_address(&self, address: &str) -> bool {
        let wanted = parse_network(address);
        self.addresses.iter().any(|a| match (&wanted, parse_network(a)) {
            (Some(w), Some(n)) => *w == n,
            _ => a == address,
        })
    }

    /// Merges `other`'s name into this pool's comma separated name. Returns
    /// whether the name changed.
    pub fn merge_name(&mut self, other: &str) -> bool {
        let merged = merge_names(&self.name, other);
        if merged == self.name {
            return false;
        }
        self.name = merged;
        true
    }
}

impl PartialEq for AddressPool {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.equal_ignoring_name(other)
    }
}

impl Eq for AddressPool {}

/// Sorted, de-duplicated union of two comma separated name lists.
pub fn merge_names(a: &str, b: &str) -> String {
    let names: BTreeSet<&str> = a
        .split(',')
        .chain(b.split(','))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    names.into_iter().collect::<Vec<_>>().join(",")
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values
}

fn parse_network(value: &str) -> Option<IpNetwork> {
    if let Ok(network) = IpNetwork::from_str(value) {
        return Some(network);
    }
    IpAddr::from_str(value).ok().map(IpNetwork::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str, addresses: &[&str]) -> AddressPool {
        AddressPool {
            protocol: PROTOCOL_BGP.into(),
            name: name.into(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            avoid_buggy_ips: false,
            auto_assign: Some(false),
            bgp_advertisements: vec![
                BgpAdvertisement {
                    aggregation_length: Some(32),
                    local_pref: None,
                    communities: vec!["no-advertise".into(), "65000:1".into()],
                },
                BgpAdvertisement {
                    aggregation_length: Some(24),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn addresses_and_advertisements_are_sets() {
        let a = pool("web", &["10.0.0.1/32", "10.0.0.2/32"]);
        let mut b = pool("web", &["10.0.0.2/32", "10.0.0.1/32"]);
        b.bgp_advertisements.reverse();
        b.bgp_advertisements[1].communities.reverse();
        assert_eq!(a, b);

        b.bgp_advertisements[1].communities.push("65000:2".into());
        assert_ne!(a, b);
    }

    #[test]
    fn name_matters_for_equality_only() {
        let a = pool("x", &["10.0.0.1/32"]);
        let b = pool("y", &["10.0.0.1/32"]);
        assert_ne!(a, b);
        assert!(a.equal_ignoring_name(&b));

        let mut c = b.clone();
        c.auto_assign = Some(true);
        assert!(!a.equal_ignoring_name(&c));
        let mut d = b.clone();
        d.avoid_buggy_ips = true;
        assert!(!a.equal_ignoring_name(&d));
    }

    #[test]
    fn merge_names_is_sorted_and_deduplicated() {
        assert_eq!(merge_names("y", "x"), "x,y");
        assert_eq!(merge_names("x", "y"), "x,y");
        assert_eq!(merge_names("x,y", "y"), "x,y");
        assert_eq!(merge_names("b,a", "c,a"), "a,b,c");

        let mut p = pool("x,y", &[]);
        assert!(!p.merge_name("x"));
        assert!(p.merge_name("z"));
        assert_eq!(p.name, "x,y,z");
    }

    #[test]
    fn contains_address_normalises_host_prefix() {
        let p = pool("web", &["147.75.1.1/32", "10.0.0.0/24"]);
        assert!(p.contains_address("147.75.1.1/32"));
        assert!(p.contains_address("147.75.1.1"));
        assert!(p.contains_address("10.0.0.0/24"));
        assert!(!p.contains_address("10.0.0.5"));
        assert!(!p.contains_address("147.75.1.2"));
    }
}
