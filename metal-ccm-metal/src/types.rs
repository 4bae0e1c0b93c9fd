use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Href {
    pub href: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub code: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpReservation {
    pub id: String,
    pub address: String,
    pub cidr: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assignments: Vec<IpAssignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<Location>,
}

impl IpReservation {
    pub fn cidr_notation(&self) -> String {
        format!("{}/{}", self.address, self.cidr)
    }

    pub fn is_assigned_to(&self, device_id: &str) -> bool {
        self.assignments
            .iter()
            .any(|a| a.device_id() == Some(device_id))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAssignment {
    pub id: String,
    #[serde(default)]
    pub address: String,
    pub assigned_to: Href,
}

impl IpAssignment {
    /// Device id from an `assigned_to` href such as `/metal/v1/devices/<id>`.
    pub fn device_id(&self) -> Option<&str> {
        self.assigned_to
            .href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpNeighbor {
    pub address_family: u8,
    #[serde(default)]
    pub customer_as: u32,
    #[serde(default)]
    pub customer_ip: String,
    #[serde(default)]
    pub md5_enabled: bool,
    #[serde(default)]
    pub md5_password: Option<String>,
    #[serde(default)]
    pub multihop: bool,
    #[serde(default)]
    pub peer_as: u32,
    #[serde(default)]
    pub peer_ips: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub asn: Option<u32>,
    #[serde(default)]
    pub deployment_type: Option<String>,
}

impl BgpConfig {
    pub fn is_enabled(&self) -> bool {
        let has_id = self.id.as_deref().is_some_and(|id| !id.is_empty());
        has_id && self.status.as_deref() != Some("disabled")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpConfigRequest {
    pub deployment_type: String,
    pub asn: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BgpSessionRequest {
    pub address_family: String,
    pub default_route: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpReservationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub fail_on_approval_required: bool,
}

impl IpReservationRequest {
    pub fn public_ipv4(tags: Vec<String>) -> Self {
        Self {
            kind: "public_ipv4".into(),
            quantity: 1,
            tags,
            fail_on_approval_required: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IpAssignmentRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReservationList {
    #[serde(default)]
    pub ip_addresses: Vec<IpReservation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NeighborList {
    #[serde(default)]
    pub bgp_neighbors: Vec<BgpNeighbor>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrors {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_device_id_from_href() {
        let assignment = IpAssignment {
            id: "a1".into(),
            address: "147.75.1.1".into(),
            assigned_to: Href {
                href: "/metal/v1/devices/0f1e9b0c-aaaa".into(),
            },
        };
        assert_eq!(assignment.device_id(), Some("0f1e9b0c-aaaa"));

        let empty = IpAssignment::default();
        assert_eq!(empty.device_id(), None);
    }

    #[test]
    fn bgp_config_enabled_requires_id_and_status() {
        assert!(!BgpConfig::default().is_enabled());
        assert!(
            !BgpConfig {
                id: Some(String::new()),
                status: Some("enabled".into()),
                ..Default::default()
            }
            .is_enabled()
        );
        assert!(
            !BgpConfig {
                id: Some("cfg".into()),
                status: Some("disabled".into()),
                ..Default::default()
            }
            .is_enabled()
        );
        assert!(
            BgpConfig {
                id: Some("cfg".into()),
                status: Some("enabled".into()),
                ..Default::default()
            }
            .is_enabled()
        );
    }

    #[test]
    fn reservation_deserializes_with_assignments() {
        let raw = r#"{
            "id": "r1",
            "address": "147.75.1.1",
            "cidr": 32,
            "tags": ["usage=cloud-provider-equinix-metal-auto"],
            "assignments": [{"id": "a1", "assigned_to": {"href": "/metal/v1/devices/d1"}}],
            "metro": {"code": "da"}
        }"#;
        let reservation: IpReservation = serde_json::from_str(raw).unwrap();
        assert_eq!(reservation.cidr_notation(), "147.75.1.1/32");
        assert!(reservation.is_assigned_to("d1"));
        assert!(!reservation.is_assigned_to("d2"));
    }
}
