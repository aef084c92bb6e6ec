//! API client for the program statistics REST API.
//!
//! This module provides the `ApiClient` struct. Each `send` is a single
//! attempt bounded by the configured timeout; retry and backoff belong to
//! the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;

use super::request::{Method, RequestSpec};
use super::{ApiError, Transport};

/// API client for the statistics backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(5)))
            .build()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, spec: &RequestSpec) -> String {
        format!("{}{}", self.base_url, spec.path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, spec: &RequestSpec) -> Result<Value, ApiError> {
        let url = self.url_for(spec);
        let builder = match spec.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        let mut builder = builder
            .header(header::ACCEPT, "application/json")
            .query(&spec.params);
        if let Some(ref body) = spec.body {
            builder = builder.json(body);
        }

        debug!(method = %spec.method, url = %url, "Sending request");
        let response = builder.send().await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            // Mutations may answer 204 No Content
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ApiConfig {
            base_url: "https://stats.example.org/api/".to_string(),
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://stats.example.org/api");
        assert_eq!(
            client.url_for(&RequestSpec::region_data("KL-TVM")),
            "https://stats.example.org/api/regions/KL-TVM/data"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_classified_transient() {
        // Port 9 on localhost: nothing listens, connection is refused
        let config = ApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        let err = client.send(&RequestSpec::health()).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {:?}", err);
    }
}
