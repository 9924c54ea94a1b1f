//! Snapshot reads from the replication backend

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::types::{Result, WatchError};

/// One replicated object as read from a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// One credential as read from a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCredential {
    pub said: String,
    pub issuer: String,
    pub recipient: String,
    pub schema: String,
    #[serde(default)]
    pub data: JsonValue,
}

/// Read access to replicated spaces
///
/// Both calls return full snapshots and may fail transiently.
#[async_trait]
pub trait ObjectReader: Send + Sync {
    async fn read_objects_by_type(&self, space_id: &str, object_type: &str) -> Result<Vec<RemoteObject>>;

    async fn read_credentials(&self, space_id: &str) -> Result<Vec<RemoteCredential>>;
}

/// Configuration for the HTTP reader
#[derive(Debug, Clone)]
pub struct HttpReaderConfig {
    /// Base URL of the replication sidecar
    pub base_url: String,
    /// Timeout for HTTP requests (default: 10 seconds)
    pub request_timeout: Duration,
}

/// [`ObjectReader`] backed by the replication sidecar's HTTP API
///
/// - `GET {base}/spaces/{space}/objects?type={type}`
/// - `GET {base}/spaces/{space}/credentials`
pub struct HttpObjectReader {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpObjectReader {
    pub fn new(config: HttpReaderConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("watchtower/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!(url = %url, "Reading snapshot");

        let response = self
            .http_client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WatchError::TransientUpstream(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ObjectReader for HttpObjectReader {
    async fn read_objects_by_type(&self, space_id: &str, object_type: &str) -> Result<Vec<RemoteObject>> {
        let url = format!("{}/spaces/{}/objects", self.base_url, space_id);
        self.get_json(&url, &[("type", object_type)]).await
    }

    async fn read_credentials(&self, space_id: &str) -> Result<Vec<RemoteCredential>> {
        let url = format!("{}/spaces/{}/credentials", self.base_url, space_id);
        self.get_json(&url, &[]).await
    }
}
