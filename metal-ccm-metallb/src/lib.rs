mod config;
pub mod crds;
mod peer;
mod pool;
mod selector;

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use thiserror::Error;

pub use config::ConfigFile;
pub use crds::{Resources, from_resources, to_resources};
pub use peer::Peer;
pub use pool::{AddressPool, BgpAdvertisement, PROTOCOL_BGP, merge_names};
pub use selector::{
    HOSTNAME_KEY, NodeSelector, Resource, SERVICE_NAME_KEY, SERVICE_NAMESPACE_KEY,
    SelectorRequirements, selectors_equal,
};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "metal-ccm";

#[derive(Error, Debug)]
pub enum Error {
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("invalid cidr: {0}")]
    InvalidCidr(#[from] ipnetwork::IpNetworkError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Renders `address/prefix`, rejecting prefixes too long for the address family.
pub fn cidr(address: &str, prefix: u8) -> Result<String> {
    let ip: IpAddr = address
        .parse()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    Ok(IpNetwork::new(ip, prefix)?.to_string())
}
