//! Fault Source over HTTP using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    source::{FaultRecord, FaultSource, PageRequest},
};
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based fault source
///
/// Issues `GET {base_url}/faults?domain=..&date=..&lastRank=..&pageSize=..`
/// and expects a JSON array of records. The puller never retries: a failed
/// page surfaces as an error so the sync job can fail as a whole.
pub struct HttpFaultSource {
    client: Client,
    base_url: String,
}

impl HttpFaultSource {
    /// Create a source with the given request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent("fault-sync/0.1.0")
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a source around a preconfigured client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/faults", self.base_url)
    }

    fn query(domain: &str, data_date: NaiveDate, page: PageRequest) -> Vec<(&'static str, String)> {
        vec![
            ("domain", domain.to_string()),
            ("date", data_date.to_string()),
            ("lastRank", page.last_rank.to_string()),
            ("pageSize", page.page_size.to_string()),
        ]
    }

    fn map_send_error(err: reqwest::Error) -> BridgeError {
        if err.is_timeout() {
            BridgeError::Timeout(err.to_string())
        } else if err.is_connect() {
            BridgeError::Transport(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            BridgeError::InvalidResponse(err.to_string())
        } else {
            BridgeError::Transport(err.to_string())
        }
    }

    fn map_status(status: StatusCode) -> BridgeError {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            BridgeError::Transport(format!("HTTP {} from fault source", status.as_u16()))
        } else {
            BridgeError::InvalidResponse(format!("HTTP {} from fault source", status.as_u16()))
        }
    }
}

/// Decode one page body.
pub(crate) fn decode_page(body: &[u8]) -> Result<Vec<FaultRecord>> {
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::InvalidResponse(format!("JSON deserialization failed: {}", e)))
}

#[async_trait]
impl FaultSource for HttpFaultSource {
    async fn pull(
        &self,
        domain: &str,
        data_date: NaiveDate,
        page: PageRequest,
    ) -> Result<Vec<FaultRecord>> {
        debug!(
            domain,
            data_date = %data_date,
            last_rank = page.last_rank,
            page_size = page.page_size,
            "Pulling fault page"
        );

        let response = self
            .client
            .get(self.endpoint())
            .query(&Self::query(domain, data_date, page))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(domain, data_date = %data_date, status = status.as_u16(), "Fault source rejected pull");
            return Err(Self::map_status(status));
        }

        let body = response.bytes().await.map_err(Self::map_send_error)?;
        decode_page(&body)
    }
}
