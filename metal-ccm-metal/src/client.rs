use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{
    ApiErrors, BgpConfig, BgpConfigRequest, BgpNeighbor, BgpSessionRequest,
    IpAssignment, IpAssignmentRequest, IpReservation, IpReservationRequest, NeighborList,
    ReservationList,
};
use crate::{Error, MetalApi, Result};

const AUTH_HEADER: &str = "X-Auth-Token";
const USER_AGENT: &str = concat!("metal-ccm/", env!("CARGO_PKG_VERSION"));

/// REST client for the project scoped parts of the infrastructure API.
#[derive(Debug, Clone)]
pub struct MetalClient {
    base_url: String,
    project_id: String,
    token: String,
    http: HttpClient,
}

impl MetalClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidUrl(base_url));
        }
        let http = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url,
            project_id: project_id.into(),
            token: token.into(),
            http,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(AUTH_HEADER, &self.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.with_auth(self.http.get(self.url(path))).send().await?;
        handle_response(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .with_auth(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    async fn post_no_content<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let response = self
            .with_auth(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .with_auth(self.http.delete(self.url(path)))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrors>(&body) {
        Ok(errs) if !errs.errors.is_empty() => errs.errors.join("; "),
        Ok(ApiErrors {
            error: Some(err), ..
        }) => err,
        _ => body,
    };
    debug!(%status, %url, %message, "metal api request failed");
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(url));
    }
    Err(Error::UnexpectedStatus {
        status: status.as_u16(),
        message,
    })
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    Ok(response.json::<T>().await?)
}

#[async_trait]
impl MetalApi for MetalClient {
    async fn list_bgp_neighbors(&self, device_id: &str) -> Result<Vec<BgpNeighbor>> {
        let list: NeighborList = self
            .get(&format!("devices/{device_id}/bgp/neighbors"))
            .await?;
        Ok(list.bgp_neighbors)
    }

    async fn create_bgp_session(&self, device_id: &str) -> Result<()> {
        let request = BgpSessionRequest {
            address_family: "ipv4".into(),
            default_route: false,
        };
        self.post_no_content(&format!("devices/{device_id}/bgp/sessions"), &request)
            .await
    }

    async fn get_project_bgp_config(&self) -> Result<BgpConfig> {
        self.get(&format!("projects/{}/bgp-config", self.project_id))
            .await
    }

    async fn create_project_bgp_config(&self, request: &BgpConfigRequest) -> Result<()> {
        self.post_no_content(&format!("projects/{}/bgp-configs", self.project_id), request)
            .await
    }

    async fn list_reservations(&self) -> Result<Vec<IpReservation>> {
        let list: ReservationList = self
            .get(&format!(
                "projects/{}/ips?include=assignments&per_page=1000",
                self.project_id
            ))
            .await?;
        Ok(list.ip_addresses)
    }

    async fn request_reservation(&self, request: &IpReservationRequest) -> Result<IpReservation> {
        self.post(&format!("projects/{}/ips", self.project_id), request)
            .await
    }

    async fn delete_reservation(&self, reservation_id: &str) -> Result<()> {
        self.delete(&format!("ips/{reservation_id}")).await
    }

    async fn assign_ip(&self, device_id: &str, address: &str) -> Result<IpAssignment> {
        let request = IpAssignmentRequest {
            address: address.to_string(),
        };
        self.post(&format!("devices/{device_id}/ips"), &request)
            .await
    }

    async fn unassign_ip(&self, assignment_id: &str) -> Result<()> {
        self.delete(&format!("ips/{assignment_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            MetalClient::new("api.example.com", "token", "project"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn joins_paths() {
        let client = MetalClient::new("https://api.example.com/metal/v1/", "t", "p").unwrap();
        assert_eq!(
            client.url("/devices/abc"),
            "https://api.example.com/metal/v1/devices/abc"
        );
        assert_eq!(client.project_id(), "p");
    }
}
