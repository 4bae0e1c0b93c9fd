use metal_ccm_k8s_utils::MetricLabel;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("kube utils error: {0}")]
    KubeUtils(#[from] metal_ccm_k8s_utils::Error),

    #[error("metal api error: {0}")]
    Metal(#[from] metal_ccm_metal::Error),

    #[error("metallb config error: {0}")]
    MetalLb(#[from] metal_ccm_metallb::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node {0} has no provider id")]
    MissingProviderId(String),

    #[error("invalid load balancer implementation {0:?}")]
    InvalidImplementation(String),

    #[error("service {0} has no namespace")]
    MissingNamespace(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl MetricLabel for Error {
    fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube",
            Error::KubeUtils(_) => "kube_utils",
            Error::Metal(_) => "metal",
            Error::MetalLb(_) => "metallb",
            Error::Json(_) => "json",
            Error::MissingProviderId(_) => "missing_provider_id",
            Error::InvalidImplementation(_) => "invalid_implementation",
            Error::MissingNamespace(_) => "missing_namespace",
        }
        .into()
    }
}
