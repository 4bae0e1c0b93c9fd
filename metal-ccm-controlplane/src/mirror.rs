//! Builds the externally reachable copies of the `default/kubernetes` Service
//! and EndpointSlice, bound to the floating address.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Service, ServicePort, ServiceSpec, ServiceStatus,
};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointSlice};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use metal_ccm_k8s_utils::SKIP_LOAD_BALANCER_ANNOTATION;

pub const SOURCE_NAMESPACE: &str = "default";
pub const SOURCE_NAME: &str = "kubernetes";
pub const EXTERNAL_NAMESPACE: &str = "default";
pub const EXTERNAL_NAME: &str = "cloud-provider-equinix-metal-kubernetes-external";

pub(crate) const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
const SLICE_MANAGED_BY_LABEL: &str = "endpointslice.kubernetes.io/managed-by";
const HTTPS_PORT: &str = "https";

fn metadata(
    labels: BTreeMap<String, String>,
    annotations: Option<BTreeMap<String, String>>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(EXTERNAL_NAME.into()),
        namespace: Some(EXTERNAL_NAMESPACE.into()),
        labels: Some(labels),
        annotations,
        ..Default::default()
    }
}

fn source_ports(source: &Service) -> Vec<ServicePort> {
    source
        .spec
        .as_ref()
        .and_then(|s| s.ports.clone())
        .unwrap_or_default()
}

/// The port the API server answers on behind the `https` Service port. A
/// named target port falls back to the Service port itself.
pub fn service_port(source: &Service) -> Option<u16> {
    let ports = source_ports(source);
    let port = ports
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTPS_PORT))
        .or_else(|| ports.first())?;
    let port = match &port.target_port {
        Some(IntOrString::Int(target)) => *target,
        _ => port.port,
    };
    u16::try_from(port).ok()
}

/// The port API servers listen on, taken from the source EndpointSlice.
pub fn endpoint_port(source: &EndpointSlice) -> Option<u16> {
    let ports = source.ports.as_deref().unwrap_or_default();
    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTPS_PORT))
        .or_else(|| ports.first())
        .and_then(|p| p.port)
        .and_then(|p| u16::try_from(p).ok())
}

/// LoadBalancer Service pinned to `address`. It is annotated so load balancer
/// reconciliation leaves it alone.
pub fn external_service(source: &Service, address: &str) -> Service {
    let ports = source_ports(source)
        .into_iter()
        .map(|p| ServicePort {
            node_port: None,
            ..p
        })
        .collect();
    Service {
        metadata: metadata(
            BTreeMap::new(),
            Some(BTreeMap::from([(
                SKIP_LOAD_BALANCER_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
        ),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".into()),
            load_balancer_ip: Some(address.into()),
            ports: Some(ports),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(address.into()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
    }
}

pub fn external_endpoint_slice(source: &EndpointSlice, manager: &str) -> EndpointSlice {
    let endpoints = source
        .endpoints
        .iter()
        .map(|e| Endpoint {
            addresses: e.addresses.clone(),
            conditions: e.conditions.as_ref().map(|c| EndpointConditions {
                ready: c.ready,
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    EndpointSlice {
        metadata: metadata(
            BTreeMap::from([
                (SERVICE_NAME_LABEL.to_string(), EXTERNAL_NAME.to_string()),
                (SLICE_MANAGED_BY_LABEL.to_string(), manager.to_string()),
            ]),
            None,
        ),
        address_type: source.address_type.clone(),
        endpoints,
        ports: source.ports.clone(),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::discovery::v1::EndpointPort;

    use super::*;

    fn source_service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(SOURCE_NAME.into()),
                namespace: Some(SOURCE_NAMESPACE.into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".into()),
                cluster_ip: Some("10.96.0.1".into()),
                ports: Some(vec![ServicePort {
                    name: Some("https".into()),
                    port: 443,
                    node_port: Some(30443),
                    target_port: Some(IntOrString::Int(6443)),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn source_slice() -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(SOURCE_NAME.into()),
                namespace: Some(SOURCE_NAMESPACE.into()),
                ..Default::default()
            },
            address_type: "IPv4".into(),
            endpoints: vec![Endpoint {
                addresses: vec!["10.0.0.1".into()],
                conditions: Some(EndpointConditions {
                    ready: Some(true),
                    serving: Some(true),
                    terminating: Some(false),
                }),
                node_name: Some("cp-1".into()),
                ..Default::default()
            }],
            ports: Some(vec![EndpointPort {
                name: Some("https".into()),
                port: Some(6443),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn external_service_is_pinned_and_skipped() {
        let svc = external_service(&source_service(), "147.75.0.1");
        assert_eq!(svc.metadata.name.as_deref(), Some(EXTERNAL_NAME));
        assert_eq!(
            svc.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(SKIP_LOAD_BALANCER_ANNOTATION))
                .map(String::as_str),
            Some("true")
        );
        let spec = svc.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.load_balancer_ip.as_deref(), Some("147.75.0.1"));
        assert_eq!(spec.cluster_ip, None);
        let ports = spec.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 443);
        assert_eq!(ports[0].node_port, None);
        let ingress = svc.status.unwrap().load_balancer.unwrap().ingress.unwrap();
        assert_eq!(ingress[0].ip.as_deref(), Some("147.75.0.1"));
    }

    #[test]
    fn external_slice_copies_addresses_and_readiness() {
        let slice = external_endpoint_slice(&source_slice(), "mgr");
        assert_eq!(slice.address_type, "IPv4");
        assert_eq!(slice.endpoints.len(), 1);
        assert_eq!(slice.endpoints[0].addresses, vec!["10.0.0.1".to_string()]);
        assert_eq!(
            slice.endpoints[0].conditions.as_ref().and_then(|c| c.ready),
            Some(true)
        );
        assert_eq!(slice.endpoints[0].node_name, None);
        let labels = slice.metadata.labels.unwrap();
        assert_eq!(labels.get(SERVICE_NAME_LABEL).map(String::as_str), Some(EXTERNAL_NAME));
        assert_eq!(slice.ports, source_slice().ports);
    }

    #[test]
    fn ports_are_detected() {
        assert_eq!(service_port(&source_service()), Some(6443));
        let mut named = source_service();
        if let Some(ports) = named.spec.as_mut().and_then(|s| s.ports.as_mut()) {
            ports[0].target_port = Some(IntOrString::String("https".into()));
        }
        assert_eq!(service_port(&named), Some(443));
        assert_eq!(endpoint_port(&source_slice()), Some(6443));
        assert_eq!(endpoint_port(&EndpointSlice::default()), None);
    }
}
