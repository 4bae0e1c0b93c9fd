use std::fmt;
use std::str::FromStr;

use crate::Error;

pub const DEFAULT_METALLB_NAMESPACE: &str = "metallb-system";
pub const DEFAULT_METALLB_CONFIG: &str = "config";

/// Load balancer backend selected by the `scheme://path` implementation string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadBalancerConfig {
    MetalLb { namespace: String, name: String },
    KubeVip,
    Empty,
    Disabled,
}

impl FromStr for LoadBalancerConfig {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(LoadBalancerConfig::Disabled);
        }
        let (scheme, path) = raw.split_once("://").unwrap_or((raw, ""));
        match scheme {
            "metallb" => {
                let path = path.trim_end_matches('/');
                let (namespace, name) = match path.split_once('/') {
                    Some((ns, name)) => (ns, name),
                    None => (path, ""),
                };
                if name.contains('/') {
                    return Err(Error::InvalidImplementation(raw.to_string()));
                }
                Ok(LoadBalancerConfig::MetalLb {
                    namespace: or_default(namespace, DEFAULT_METALLB_NAMESPACE),
                    name: or_default(name, DEFAULT_METALLB_CONFIG),
                })
            }
            "kube-vip" => Ok(LoadBalancerConfig::KubeVip),
            "empty" => Ok(LoadBalancerConfig::Empty),
            _ => Err(Error::InvalidImplementation(raw.to_string())),
        }
    }
}

impl fmt::Display for LoadBalancerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancerConfig::MetalLb { namespace, name } => {
                write!(f, "metallb://{namespace}/{name}")
            }
            LoadBalancerConfig::KubeVip => write!(f, "kube-vip://"),
            LoadBalancerConfig::Empty => write!(f, "empty://"),
            LoadBalancerConfig::Disabled => write!(f, "disabled"),
        }
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metallb(ns: &str, name: &str) -> LoadBalancerConfig {
        LoadBalancerConfig::MetalLb {
            namespace: ns.into(),
            name: name.into(),
        }
    }

    #[test]
    fn parses_schemes() {
        assert_eq!("".parse::<LoadBalancerConfig>().unwrap(), LoadBalancerConfig::Disabled);
        assert_eq!("kube-vip://".parse::<LoadBalancerConfig>().unwrap(), LoadBalancerConfig::KubeVip);
        assert_eq!("empty://".parse::<LoadBalancerConfig>().unwrap(), LoadBalancerConfig::Empty);
        assert!("haproxy://x".parse::<LoadBalancerConfig>().is_err());
    }

    #[test]
    fn metallb_path_defaults() {
        assert_eq!(
            "metallb://".parse::<LoadBalancerConfig>().unwrap(),
            metallb(DEFAULT_METALLB_NAMESPACE, DEFAULT_METALLB_CONFIG)
        );
        assert_eq!(
            "metallb://lb".parse::<LoadBalancerConfig>().unwrap(),
            metallb("lb", DEFAULT_METALLB_CONFIG)
        );
        assert_eq!(
            "metallb://lb/peers".parse::<LoadBalancerConfig>().unwrap(),
            metallb("lb", "peers")
        );
        assert_eq!(
            "metallb:///peers".parse::<LoadBalancerConfig>().unwrap(),
            metallb(DEFAULT_METALLB_NAMESPACE, "peers")
        );
        assert!("metallb://a/b/c".parse::<LoadBalancerConfig>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for raw in ["metallb://lb/peers", "kube-vip://", "empty://"] {
            let parsed: LoadBalancerConfig = raw.parse().unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
    }
}
