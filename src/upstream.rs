//! Upstream emissions service client
//!
//! Speaks the emissions API's JSON dialect and bounds every call with the
//! configured upstream timeout. Non-2xx responses, transport failures, and
//! malformed bodies all collapse into a single aggregate error; the
//! coordinator downgrades that to "all keys missing" anyway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time;

use crate::schema::{EmissionsBreakdown, Row};
use crate::storage::EmissionSource;
use crate::ProxyError;

#[derive(Debug, Serialize)]
struct UpstreamRequest {
    rows: Vec<UpstreamRequestRow>,
}

#[derive(Debug, Serialize)]
struct UpstreamRequestRow {
    #[serde(rename = "inventoryId")]
    inventory_id: String,
    priority: u32,
}

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    rows: Vec<UpstreamResponseRow>,
}

#[derive(Debug, Deserialize)]
struct UpstreamResponseRow {
    #[serde(rename = "inventoryId")]
    inventory_id: String,
    #[serde(rename = "emissionsBreakdown")]
    emissions_breakdown: UpstreamBreakdown,
}

#[derive(Debug, Deserialize)]
struct UpstreamBreakdown {
    total_emissions_grams: f64,
    inventory_coverage: String,
    climate_risk_compliant: bool,
}

/// HTTP client for the emissions endpoint.
#[derive(Debug)]
pub struct EmissionClient {
    http: reqwest::Client,
    url: String,
}

impl EmissionClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProxyError> {
        let url = url.into();
        if url.is_empty() {
            return Err(ProxyError::Config("emission url is empty".to_owned()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        let response = self.http.post(&self.url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Upstream(format!("unexpected status: {status}")));
        }
        Ok(response.json().await?)
    }
}

/// Deadline-bounded gateway mapping domain rows onto the wire and back.
pub struct EmissionGateway {
    client: EmissionClient,
    timeout: Duration,
}

impl EmissionGateway {
    pub fn new(client: EmissionClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl EmissionSource for EmissionGateway {
    async fn get_emissions(&self, rows: Vec<Row>) -> Result<Vec<Row>, ProxyError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let request = to_wire(&rows);
        let response = time::timeout(self.timeout, self.client.fetch(&request))
            .await
            .map_err(|_| ProxyError::Upstream("emissions call timed out".to_owned()))??;
        Ok(from_wire(response))
    }
}

fn to_wire(rows: &[Row]) -> UpstreamRequest {
    UpstreamRequest {
        rows: rows
            .iter()
            .map(|row| UpstreamRequestRow {
                inventory_id: row.inventory_id.clone(),
                priority: row.priority,
            })
            .collect(),
    }
}

/// Response rows carry no priority; the coordinator stamps the client's
/// before anything is cached.
fn from_wire(response: UpstreamResponse) -> Vec<Row> {
    response
        .rows
        .into_iter()
        .map(|row| Row {
            inventory_id: row.inventory_id,
            priority: 0,
            emissions_breakdown: EmissionsBreakdown {
                total_grams: row.emissions_breakdown.total_emissions_grams,
                coverage: row.emissions_breakdown.inventory_coverage,
                climate_risk_compliant: row.emissions_breakdown.climate_risk_compliant,
            },
        })
        .collect()
}
