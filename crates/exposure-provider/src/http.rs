//! HTTP adapter for the scanning provider's REST API.
//!
//! Endpoints:
//! - `POST {base}/profiles/{profile}/scans`
//! - `GET {base}/profiles/{profile}/scans/{scan}`
//! - `GET {base}/scan-results/?profile_id[]={profile}&per_page={n}&page={p}`

use crate::client::{RemoteJob, ResultPage, ScanProviderClient};
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use exposure_core::{
    ProfileRef, ProviderConfig, RemoteJobId, ScanJobStatus, ScanResultRecord, ScanResultStatus,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

const PROVIDER_ID: &str = "onerep";

/// Scanning provider reached over HTTPS.
pub struct HttpScanProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpScanProvider {
    /// Create a client for `base_url` without credentials.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, None, Duration::from_secs(30))
    }

    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        if config.api_key.is_none() {
            tracing::warn!("No provider API key configured; requests will be unauthenticated");
        }
        Self::with_timeout(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Create a client with explicit credentials and timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.basic_auth(key, None::<&str>),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorize(request).send().await?;
        let response = check_status(response).await?;
        response.json().await.map_err(|e| ProviderError::ParseError {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to parse response: {e}"),
        })
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ProviderError::ApiError {
        provider: PROVIDER_ID.to_string(),
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ScanProviderClient for HttpScanProvider {
    async fn create_job(&self, profile: ProfileRef) -> Result<RemoteJob> {
        let url = format!("{}/profiles/{}/scans", self.base_url, profile);
        let scan: WireScan = self.send(self.client.post(url)).await?;
        scan.into_remote_job()
    }

    async fn job_status(&self, profile: ProfileRef, job: RemoteJobId) -> Result<ScanJobStatus> {
        let url = format!("{}/profiles/{}/scans/{}", self.base_url, profile, job);
        let scan: WireScan = self.send(self.client.get(url)).await?;
        parse_job_status(&scan.status)
    }

    async fn fetch_result_page(
        &self,
        profile: ProfileRef,
        page: u32,
        page_size: u32,
    ) -> Result<ResultPage> {
        let url = format!("{}/scan-results/", self.base_url);
        let request = self.client.get(url).query(&[
            ("profile_id[]", profile.get().to_string()),
            ("per_page", page_size.to_string()),
            ("page", page.to_string()),
        ]);
        let list: WireResultList = self.send(request).await?;
        list.into_page()
    }

    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }
}

/// Scan object returned by the create and detail endpoints.
#[derive(Debug, Deserialize)]
struct WireScan {
    id: i64,
    status: String,
}

impl WireScan {
    fn into_remote_job(self) -> Result<RemoteJob> {
        Ok(RemoteJob {
            id: RemoteJobId::new(self.id),
            status: parse_job_status(&self.status)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireResultList {
    data: Vec<WireScanResult>,
    meta: WireMeta,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    current_page: u32,
    last_page: u32,
}

#[derive(Debug, Deserialize)]
struct WireScanResult {
    id: i64,
    scan_id: i64,
    status: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    data_broker: String,
    first_name: Option<String>,
    middle_name: Option<String>,
    last_name: Option<String>,
    age: Option<JsonValue>,
    #[serde(default)]
    addresses: Vec<JsonValue>,
    #[serde(default)]
    phones: Vec<String>,
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    relatives: Vec<String>,
}

impl WireResultList {
    fn into_page(self) -> Result<ResultPage> {
        let items = self
            .data
            .into_iter()
            .map(WireScanResult::into_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(ResultPage {
            items,
            page_number: self.meta.current_page,
            last_page_number: self.meta.last_page,
        })
    }
}

impl WireScanResult {
    fn into_record(self) -> Result<ScanResultRecord> {
        let status = self
            .status
            .parse::<ScanResultStatus>()
            .map_err(|e| parse_error(e.to_string()))?;

        Ok(ScanResultRecord {
            job_id: RemoteJobId::new(self.scan_id),
            external_record_id: self.id,
            status,
            manually_resolved: false,
            data_broker: self.data_broker,
            link: self.link,
            extracted_data: serde_json::json!({
                "first_name": self.first_name,
                "middle_name": self.middle_name,
                "last_name": self.last_name,
                "age": self.age,
                "addresses": self.addresses,
                "phones": self.phones,
                "emails": self.emails,
                "relatives": self.relatives,
            }),
        })
    }
}

fn parse_job_status(status: &str) -> Result<ScanJobStatus> {
    status.parse().map_err(|e: exposure_core::ExposureError| parse_error(e.to_string()))
}

fn parse_error(message: String) -> ProviderError {
    ProviderError::ParseError {
        provider: PROVIDER_ID.to_string(),
        message,
    }
}
