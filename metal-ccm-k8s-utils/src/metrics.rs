use std::borrow::Cow;
use std::sync::{LazyLock, RwLock};

use kube::Resource;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time::Instant;

pub static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_prefix("metal_ccm")));

/// Errors that can be counted by [`ControllerMetrics::count_failure`].
pub trait MetricLabel {
    fn metric_label(&self) -> String;
}

#[derive(Clone)]
pub struct ControllerMetrics {
    pub runs: Family<ControllerLabels, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Histogram,
}

impl ControllerMetrics {
    /// Register API metrics to start tracking them.
    pub fn new(controller_name: &str) -> Self {
        let mut guard = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
        let registry = guard.sub_registry_with_label((
            Cow::Borrowed("controller_name"),
            Cow::Owned(controller_name.into()),
        ));
        let runs = Family::<ControllerLabels, Counter>::default();
        let failures = Family::<ErrorLabels, Counter>::default();
        let duration = Histogram::new([0.01, 0.1, 0.25, 0.5, 1.0, 5.0, 15.0, 60.0].into_iter());

        registry.register_with_unit(
            "reconcile_duration",
            "reconcile duration",
            Unit::Seconds,
            duration.clone(),
        );
        registry.register(
            "reconcile_failures",
            "Number of reconciliation errors",
            failures.clone(),
        );
        registry.register("reconcile_runs", "Number of reconciliations", runs.clone());
        Self {
            runs,
            failures,
            duration,
        }
    }

    pub fn count_failure<K, E>(&self, e: &E)
    where
        K: Resource<DynamicType = ()>,
        E: MetricLabel,
    {
        self.failures
            .get_or_create(&ErrorLabels {
                resource: K::kind(&()).into_owned().to_lowercase(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure<K>(&self) -> ReconcileMeasurer
    where
        K: Resource<DynamicType = ()>,
    {
        self.runs
            .get_or_create(&ControllerLabels {
                resource: K::kind(&()).into_owned().to_lowercase(),
            })
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.duration.clone(),
        }
    }
}

pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric.observe(self.start.elapsed().as_secs_f64());
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ControllerLabels {
    pub resource: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub resource: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Node;

    use super::*;

    struct Boom;

    impl MetricLabel for Boom {
        fn metric_label(&self) -> String {
            "boom".into()
        }
    }

    #[test]
    fn runs_and_failures_are_labelled() {
        let metrics = ControllerMetrics::new("metrics-test");
        {
            let _timer = metrics.count_and_measure::<Node>();
        }
        metrics.count_failure::<Node, _>(&Boom);

        let mut buffer = String::new();
        let registry = REGISTRY.read().unwrap();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
        let runs = buffer
            .lines()
            .find(|l| {
                l.starts_with("metal_ccm_reconcile_runs_total{") && l.contains("metrics-test")
            })
            .unwrap();
        assert!(runs.contains("resource=\"node\""));
        assert!(runs.ends_with(" 1"));
        assert!(buffer.contains("error=\"boom\""));
        assert!(buffer.contains("metal_ccm_reconcile_duration_seconds_count"));
    }
}
