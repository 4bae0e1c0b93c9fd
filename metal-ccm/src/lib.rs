pub mod config;
pub mod controller;
pub mod http;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("metal api error: {0}")]
    Metal(#[from] metal_ccm_metal::Error),

    #[error("load balancer error: {0}")]
    LoadBalancer(#[from] metal_ccm_loadbalancer::Error),

    #[error("control plane error: {0}")]
    ControlPlane(#[from] metal_ccm_controlplane::Error),

    #[error("task failed: {0}")]
    Task(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
