use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use metal_ccm_loadbalancer::LoadBalancerConfig;
use metal_ccm_metal::DEFAULT_API_URL;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    Controller(ControllerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Base URL of the Metal API
    #[arg(long, env = "METAL_API_URL", default_value = DEFAULT_API_URL)]
    pub metal_api_url: String,

    /// Metal API token
    #[arg(long, env = "METAL_API_KEY", hide_env_values = true)]
    pub metal_auth_token: String,

    /// Project owning the cluster devices and reservations
    #[arg(long, env = "METAL_PROJECT_ID")]
    pub project_id: String,

    /// Default metro for new load balancer reservations
    #[arg(long, env = "METAL_METRO_NAME")]
    pub metro: Option<String>,

    /// Default facility for new load balancer reservations when no metro is set
    #[arg(long, env = "METAL_FACILITY_NAME")]
    pub facility: Option<String>,

    /// Load balancer implementation, e.g. metallb:///, kube-vip://, empty://.
    /// Empty disables load balancing.
    #[arg(long, env = "METAL_LOAD_BALANCER", default_value = "", value_parser = parse_load_balancer)]
    pub load_balancer: LoadBalancerConfig,

    /// Manage MetalLB through its custom resources instead of the ConfigMap
    #[arg(long, env = "METAL_METALLB_CRDS")]
    pub metallb_crds: bool,

    /// Local ASN for BGP sessions
    #[arg(long, env = "METAL_LOCAL_ASN", default_value_t = 65000)]
    pub local_asn: u32,

    /// Password for BGP sessions
    #[arg(long, env = "METAL_BGP_PASS", default_value = "", hide_env_values = true)]
    pub bgp_pass: String,

    /// Tag of the control plane floating address. Empty disables failover.
    #[arg(long, env = "METAL_EIP_TAG", default_value = "")]
    pub eip_tag: String,

    /// API server port behind the floating address, 0 to detect it
    #[arg(long, env = "METAL_API_SERVER_PORT", default_value_t = 0)]
    pub api_server_port: u16,

    /// Health check the floating address holder through its own external address
    #[arg(long, env = "METAL_EIP_HEALTH_CHECK_USE_HOST_IP")]
    pub eip_health_check_use_host_ip: bool,

    /// Metrics listener for the controller
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Cluster id used to tag reservations, defaults to the kube-system namespace uid
    #[arg(long, env = "METAL_CLUSTER_ID")]
    pub cluster_id: Option<String>,
}

fn parse_load_balancer(raw: &str) -> Result<LoadBalancerConfig, String> {
    raw.parse().map_err(|e: metal_ccm_loadbalancer::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<ControllerArgs, clap::Error> {
        let mut args = vec![
            "metal-ccm",
            "controller",
            "--metal-auth-token",
            "token",
            "--project-id",
            "project",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).map(|cli| match cli.command {
            Commands::Controller(args) => args,
        })
    }

    #[test]
    fn defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.metal_api_url, DEFAULT_API_URL);
        assert_eq!(args.load_balancer, LoadBalancerConfig::Disabled);
        assert_eq!(args.local_asn, 65000);
        assert_eq!(args.api_server_port, 0);
        assert!(args.eip_tag.is_empty());
        assert!(!args.metallb_crds);
        assert_eq!(args.metrics_address, "0.0.0.0:9090".parse().unwrap());
    }

    #[test]
    fn load_balancer_is_parsed() {
        let args = parse(&["--load-balancer", "metallb://lb/cfg", "--metallb-crds"]).unwrap();
        assert_eq!(
            args.load_balancer,
            LoadBalancerConfig::MetalLb {
                namespace: "lb".into(),
                name: "cfg".into()
            }
        );
        assert!(args.metallb_crds);
        assert!(parse(&["--load-balancer", "nginx://"]).is_err());
    }
}
