//! Raw HTTP transport seam for the agreement API
//!
//! The fetch client's retry and scope-validation behavior is specified in
//! terms of how many times the wire is actually touched, so the wire is a
//! trait (allows counting invocations in tests).

use std::time::Duration;

use async_trait::async_trait;

/// Transport-level failure (connection refused, timeout, TLS, ...)
#[derive(Debug, thiserror::Error)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// A raw HTTP response: status plus body text. Parsing is the caller's job.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for issuing authenticated GET requests (allows mocking in tests)
#[async_trait]
pub trait AgreementTransport: Send + Sync {
    /// Issue a GET with bearer header and identity cookies attached
    async fn get(
        &self,
        url: &str,
        bearer_token: &str,
        cookie_header: &str,
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by reqwest
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a fixed per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AgreementTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        bearer_token: &str,
        cookie_header: &str,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", bearer_token))
            .header("Cookie", cookie_header)
            .send()
            .await
            .map_err(|e| TransportError(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("Body read failed: {}", e)))?;

        Ok(TransportResponse { status, body })
    }
}
