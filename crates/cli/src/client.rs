//! API client for communicating with the ezkonnect server

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the ezkonnect server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        // Annotate calls block until the operator confirms, so allow longer
        // than the server's own deadline
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        // Relative joins replace the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn state(&self) -> Result<Vec<StateRecord>> {
        self.get("api/v1/state").await
    }

    pub async fn annotate_traces(&self, items: &[TracesItem]) -> Result<Vec<AnnotateResult>> {
        self.post("api/v1/annotate/traces", &items).await
    }

    pub async fn annotate_logs(&self, items: &[LogsItem]) -> Result<Vec<AnnotateResult>> {
        self.post("api/v1/annotate/logs", &items).await
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub name: String,
    pub namespace: String,
    pub controller_kind: String,
    pub container_name: Option<String>,
    pub traces_instrumented: bool,
    pub traces_instrumentable: bool,
    pub service_name: Option<String>,
    pub application: Option<String>,
    pub language: Option<String>,
    pub detection_status: String,
    pub opentelemetry_preconfigured: Option<bool>,
    pub log_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracesItem {
    pub name: String,
    pub controller_kind: String,
    pub namespace: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsItem {
    pub name: String,
    pub controller_kind: String,
    pub namespace: String,
    pub log_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateResult {
    pub name: String,
    pub namespace: String,
    pub controller_kind: String,
    pub updated_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
