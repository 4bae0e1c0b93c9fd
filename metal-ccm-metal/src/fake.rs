//! In-memory [`MetalApi`] used by tests across the workspace.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{
    BgpConfig, BgpConfigRequest, BgpNeighbor, Href, IpAssignment, IpReservation,
    IpReservationRequest,
};
use crate::{Error, MetalApi, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    pub sessions: usize,
    pub bgp_configs: usize,
    pub reservations_requested: usize,
    pub reservations_deleted: usize,
    pub assigned: usize,
    pub unassigned: usize,
}

#[derive(Default)]
struct State {
    neighbors: HashMap<String, Vec<BgpNeighbor>>,
    sessions: HashSet<String>,
    reservations: Vec<IpReservation>,
    bgp_config: Option<BgpConfig>,
    fail_requests: bool,
    request_delay: Option<Duration>,
    next_id: u32,
    next_address: u8,
    calls: Calls,
}

#[derive(Default)]
pub struct FakeMetal {
    state: Mutex<State>,
}

impl FakeMetal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_neighbor(&self, device_id: &str, neighbor: BgpNeighbor) {
        self.lock()
            .neighbors
            .entry(device_id.to_string())
            .or_default()
            .push(neighbor);
    }

    pub fn add_reservation(&self, reservation: IpReservation) {
        self.lock().reservations.push(reservation);
    }

    /// Makes every subsequent reservation request fail as if approval were required.
    pub fn fail_requests(&self, fail: bool) {
        self.lock().fail_requests = fail;
    }

    /// Holds every reservation request for `delay` before it is granted.
    pub fn delay_requests(&self, delay: Duration) {
        self.lock().request_delay = Some(delay);
    }

    pub fn reservations(&self) -> Vec<IpReservation> {
        self.lock().reservations.clone()
    }

    pub fn reservation(&self, id: &str) -> Option<IpReservation> {
        self.lock().reservations.iter().find(|r| r.id == id).cloned()
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MetalApi for FakeMetal {
    async fn list_bgp_neighbors(&self, device_id: &str) -> Result<Vec<BgpNeighbor>> {
        Ok(self
            .lock()
            .neighbors
            .get(device_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_bgp_session(&self, device_id: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.sessions.insert(device_id.to_string()) {
            return Err(Error::UnexpectedStatus {
                status: 422,
                message: "BGP session already exists".into(),
            });
        }
        state.calls.sessions += 1;
        Ok(())
    }

    async fn get_project_bgp_config(&self) -> Result<BgpConfig> {
        self.lock()
            .bgp_config
            .clone()
            .ok_or_else(|| Error::NotFound("bgp-config".into()))
    }

    async fn create_project_bgp_config(&self, request: &BgpConfigRequest) -> Result<()> {
        let mut state = self.lock();
        state.calls.bgp_configs += 1;
        state.bgp_config = Some(BgpConfig {
            id: Some(format!("bgp-{}", state.calls.bgp_configs)),
            status: Some("enabled".into()),
            asn: Some(request.asn),
            deployment_type: Some(request.deployment_type.clone()),
        });
        Ok(())
    }

    async fn list_reservations(&self) -> Result<Vec<IpReservation>> {
        Ok(self.lock().reservations.clone())
    }

    async fn request_reservation(&self, request: &IpReservationRequest) -> Result<IpReservation> {
        let delay = self.lock().request_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        state.calls.reservations_requested += 1;
        if state.fail_requests {
            return Err(Error::UnexpectedStatus {
                status: 422,
                message: "request requires approval".into(),
            });
        }
        state.next_id += 1;
        state.next_address += 1;
        let reservation = IpReservation {
            id: format!("reservation-{}", state.next_id),
            address: format!("147.75.100.{}", state.next_address),
            cidr: 32,
            tags: request.tags.clone(),
            ..Default::default()
        };
        state.reservations.push(reservation.clone());
        Ok(reservation)
    }

    async fn delete_reservation(&self, reservation_id: &str) -> Result<()> {
        let mut state = self.lock();
        let before = state.reservations.len();
        state.reservations.retain(|r| r.id != reservation_id);
        if state.reservations.len() == before {
            return Err(Error::NotFound(format!("ip {reservation_id}")));
        }
        state.calls.reservations_deleted += 1;
        Ok(())
    }

    async fn assign_ip(&self, device_id: &str, address: &str) -> Result<IpAssignment> {
        let mut state = self.lock();
        state.next_id += 1;
        let assignment = IpAssignment {
            id: format!("assignment-{}", state.next_id),
            address: address.to_string(),
            assigned_to: Href {
                href: format!("/metal/v1/devices/{device_id}"),
            },
        };
        let reservation = state
            .reservations
            .iter_mut()
            .find(|r| r.address == address)
            .ok_or_else(|| Error::NotFound(format!("ip {address}")))?;
        reservation.assignments.push(assignment.clone());
        state.calls.assigned += 1;
        Ok(assignment)
    }

    async fn unassign_ip(&self, assignment_id: &str) -> Result<()> {
        let mut state = self.lock();
        let mut found = false;
        for reservation in state.reservations.iter_mut() {
            let before = reservation.assignments.len();
            reservation.assignments.retain(|a| a.id != assignment_id);
            found |= reservation.assignments.len() != before;
        }
        if !found {
            return Err(Error::NotFound(format!("assignment {assignment_id}")));
        }
        state.calls.unassigned += 1;
        Ok(())
    }
}
