use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const HOSTNAME_KEY: &str = "kubernetes.io/hostname";
pub const SERVICE_NAMESPACE_KEY: &str = "nomatch.metal.equinix.com/service-namespace";
pub const SERVICE_NAME_KEY: &str = "nomatch.metal.equinix.com/service-name";

/// A namespaced object reference carried in service marker selectors.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resource {
    pub namespace: String,
    pub name: String,
}

impl Resource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<SelectorRequirements>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SelectorRequirements {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

pub(crate) type RequirementKey<'a> = (&'a str, &'a str, usize, Vec<&'a str>);
pub(crate) type SelectorKey<'a> = (Vec<(&'a str, &'a str)>, Vec<RequirementKey<'a>>);

impl SelectorRequirements {
    fn canonical_key(&self) -> RequirementKey<'_> {
        let mut values: Vec<&str> = self.values.iter().map(String::as_str).collect();
        values.sort_unstable();
        (&self.key, &self.operator, values.len(), values)
    }
}

impl PartialEq for SelectorRequirements {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for SelectorRequirements {}

impl NodeSelector {
    pub fn hostname(node: &str) -> Self {
        Self {
            match_labels: BTreeMap::from([(HOSTNAME_KEY.to_string(), node.to_string())]),
            match_expressions: vec![],
        }
    }

    /// Marker selector recording that a peer serves `namespace/name`. It never
    /// matches a real node.
    pub fn for_service(namespace: &str, name: &str) -> Self {
        Self {
            match_labels: BTreeMap::from([
                (SERVICE_NAMESPACE_KEY.to_string(), namespace.to_string()),
                (SERVICE_NAME_KEY.to_string(), name.to_string()),
            ]),
            match_expressions: vec![],
        }
    }

    /// The service this selector marks, if it is a service marker.
    pub fn service(&self) -> Option<Resource> {
        if !self.match_expressions.is_empty() || self.match_labels.len() != 2 {
            return None;
        }
        let namespace = self.match_labels.get(SERVICE_NAMESPACE_KEY)?;
        let name = self.match_labels.get(SERVICE_NAME_KEY)?;
        Some(Resource::new(namespace, name))
    }

    pub fn is_service_marker(&self) -> bool {
        self.service().is_some()
    }

    /// Node name of a plain hostname selector.
    pub fn hostname_value(&self) -> Option<&str> {
        if !self.match_expressions.is_empty() || self.match_labels.len() != 1 {
            return None;
        }
        self.match_labels.get(HOSTNAME_KEY).map(String::as_str)
    }

    pub(crate) fn canonical_key(&self) -> SelectorKey<'_> {
        let labels = self
            .match_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut requirements: Vec<RequirementKey<'_>> = self
            .match_expressions
            .iter()
            .map(SelectorRequirements::canonical_key)
            .collect();
        requirements.sort();
        (labels, requirements)
    }
}

impl PartialEq for NodeSelector {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for NodeSelector {}

/// Compares two selector lists as unordered collections.
pub fn selectors_equal<'a, A, B>(a: A, b: B) -> bool
where
    A: IntoIterator<Item = &'a NodeSelector>,
    B: IntoIterator<Item = &'a NodeSelector>,
{
    let mut a: Vec<SelectorKey<'a>> = a.into_iter().map(NodeSelector::canonical_key).collect();
    let mut b: Vec<SelectorKey<'a>> = b.into_iter().map(NodeSelector::canonical_key).collect();
    if a.len() != b.len() {
        return false;
    }
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(key: &str, op: &str, values: &[&str]) -> SelectorRequirements {
        SelectorRequirements {
            key: key.into(),
            operator: op.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn requirement_values_are_unordered() {
        assert_eq!(
            requirement("zone", "In", &["a", "b", "c"]),
            requirement("zone", "In", &["c", "a", "b"])
        );
        assert_ne!(
            requirement("zone", "In", &["a", "b"]),
            requirement("zone", "In", &["a", "b", "c"])
        );
        assert_ne!(
            requirement("zone", "In", &["a"]),
            requirement("zone", "NotIn", &["a"])
        );
    }

    #[test]
    fn expressions_are_unordered() {
        let a = NodeSelector {
            match_labels: BTreeMap::from([("role".into(), "edge".into())]),
            match_expressions: vec![
                requirement("zone", "In", &["a", "b"]),
                requirement("rack", "NotIn", &["r1"]),
            ],
        };
        let b = NodeSelector {
            match_labels: BTreeMap::from([("role".into(), "edge".into())]),
            match_expressions: vec![
                requirement("rack", "NotIn", &["r1"]),
                requirement("zone", "In", &["b", "a"]),
            ],
        };
        assert_eq!(a, b);

        let mut c = b.clone();
        c.match_labels.insert("role".into(), "core".into());
        assert_ne!(a, c);
    }

    #[test]
    fn selector_lists_compare_as_sets() {
        let x = NodeSelector::hostname("node-a");
        let y = NodeSelector::for_service("default", "web");
        assert!(selectors_equal(
            &[x.clone(), y.clone()],
            &[y.clone(), x.clone()]
        ));
        assert!(!selectors_equal(&[x.clone()], &[x.clone(), y.clone()]));
        assert!(!selectors_equal(&[x], &[y]));
    }

    #[test]
    fn service_marker_detection() {
        let marker = NodeSelector::for_service("default", "web");
        assert_eq!(marker.service(), Some(Resource::new("default", "web")));
        assert!(NodeSelector::hostname("node-a").service().is_none());

        let mut extended = marker.clone();
        extended.match_labels.insert("extra".into(), "x".into());
        assert!(!extended.is_service_marker());

        assert_eq!(
            NodeSelector::hostname("node-a").hostname_value(),
            Some("node-a")
        );
        assert_eq!(marker.hostname_value(), None);
    }
}
