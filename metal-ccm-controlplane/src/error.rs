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

    #[error("failed to build health prober: {0}")]
    Prober(#[from] reqwest::Error),

    #[error("no reservation tagged {0:?}")]
    ReservationNotFound(String),

    /// Needs an operator; never repaired automatically.
    #[error("reservation {id} has {count} assignments, expected at most one")]
    MultipleAssignments { id: String, count: usize },

    #[error("no healthy control plane node found for {0}")]
    NoHealthyCandidate(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl MetricLabel for Error {
    fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube",
            Error::KubeUtils(_) => "kube_utils",
            Error::Metal(_) => "metal",
            Error::Prober(_) => "prober",
            Error::ReservationNotFound(_) => "reservation_not_found",
            Error::MultipleAssignments { .. } => "multiple_assignments",
            Error::NoHealthyCandidate(_) => "no_healthy_candidate",
        }
        .into()
    }
}
