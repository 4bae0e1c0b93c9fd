use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::Result;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers whether an API server is serving on `address:port`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn is_healthy(&self, address: &str, port: u16) -> bool;
}

/// Probes `https://<address>:<port>/healthz`. Certificates are not verified
/// since node addresses never appear in the serving certificate.
pub struct HttpsProber {
    client: Client,
}

impl HttpsProber {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }
}

fn healthz_url(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("https://[{address}]:{port}/healthz")
    } else {
        format!("https://{address}:{port}/healthz")
    }
}

#[async_trait]
impl HealthProber for HttpsProber {
    async fn is_healthy(&self, address: &str, port: u16) -> bool {
        let url = healthz_url(address, port);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                debug!(%url, status = %resp.status(), "unhealthy api server");
                false
            }
            Err(e) => {
                debug!(%url, %e, "api server unreachable");
                false
            }
        }
    }
}
