//! Pass-through proxy to the external numerology service.
//!
//! The request body is forwarded as-is and the upstream status and body come
//! back unchanged. The relay never looks inside either.

use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;
use tracing::{info, warn};

use crate::error::ServerError;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NumerologyProxy {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl NumerologyProxy {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(UPSTREAM_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url: url.into(),
            api_key,
        }
    }

    /// POST `body` upstream and return its status and body.
    pub async fn forward(&self, body: Bytes) -> Result<(StatusCode, Bytes), ServerError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "Numerology request failed");
            ServerError::Upstream(e.to_string())
        })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| ServerError::Internal(format!("Bad upstream status: {e}")))?;
        let body = response.bytes().await.map_err(|e| {
            warn!(error = %e, "Failed to read numerology response");
            ServerError::Internal(format!("Failed to read upstream response: {e}"))
        })?;

        info!(status = status.as_u16(), "Numerology request completed");
        Ok((status, body))
    }
}
