//! Upstream ban/unban access-control API
//!
//! The upstream system is the source of truth for ban state and reports
//! "already banned" / "not banned" conditions as free-text error payloads
//! with no structured code. All substring matching against that fragile
//! vendor contract lives in [`classify_upstream_error`] so there is exactly
//! one seam to update and one place to unit-test with literal fixtures.
//!
//! Ban/unban calls carry a fixed timeout and are never retried
//! automatically: the endpoint is not safe under at-least-once delivery,
//! and a failed attempt is surfaced rather than silently re-issued.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::session::SessionContext;

/// Failure from the ban/unban endpoint
#[derive(Debug, thiserror::Error)]
pub enum AccessApiError {
    /// Upstream answered with a non-success status; payload attached for
    /// idempotency classification
    #[error("Upstream rejected the request: {0}")]
    Rejected(String),

    /// The request never completed (timeout, connection failure)
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Classification of an upstream ban/unban error payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// The desired end state already holds (idempotent no-op)
    AlreadyInTargetState,
    /// A genuine failure
    GenuineError,
}

/// Classify a free-text upstream error payload.
///
/// "already banned" / "duplicate" come back from create-ban when the member
/// is banned; "not banned" comes back from remove-ban when they are not.
/// All three mean the desired end state already holds.
pub fn classify_upstream_error(body: &str) -> UpstreamOutcome {
    let lower = body.to_lowercase();
    if lower.contains("already banned")
        || lower.contains("duplicate")
        || lower.contains("not banned")
    {
        UpstreamOutcome::AlreadyInTargetState
    } else {
        UpstreamOutcome::GenuineError
    }
}

/// Trait for the upstream access-control endpoints (allows mocking in tests)
#[async_trait]
pub trait AccessApi: Send + Sync {
    /// Create a ban for a member, with an attribution note (who/why)
    async fn create_ban(&self, member_id: &str, note: &str) -> Result<(), AccessApiError>;

    /// Remove an existing ban for a member
    async fn remove_ban(&self, member_id: &str) -> Result<(), AccessApiError>;
}

/// Production access API backed by reqwest
pub struct HttpAccessApi {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    cookie_header: String,
}

impl HttpAccessApi {
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
        session: &SessionContext,
        timeout: Duration,
    ) -> Result<Self, AccessApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccessApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            cookie_header: session.cookie_header(),
        })
    }

    fn ban_url(&self, member_id: &str) -> String {
        format!(
            "{}/api/v1/members/{}/ban",
            self.base_url,
            urlencoding::encode(member_id)
        )
    }

    async fn read_outcome(response: reqwest::Response) -> Result<(), AccessApiError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AccessApiError::Transport(format!("Body read failed: {}", e)))?;

        if status.is_success() {
            Ok(())
        } else {
            Err(AccessApiError::Rejected(body))
        }
    }
}

#[async_trait]
impl AccessApi for HttpAccessApi {
    async fn create_ban(&self, member_id: &str, note: &str) -> Result<(), AccessApiError> {
        debug!(member_id = member_id, "Creating upstream ban");

        let response = self
            .client
            .put(self.ban_url(member_id))
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Cookie", &self.cookie_header)
            .json(&json!({ "member": { "id": member_id }, "note": note }))
            .send()
            .await
            .map_err(|e| AccessApiError::Transport(format!("Request failed: {}", e)))?;

        Self::read_outcome(response).await
    }

    async fn remove_ban(&self, member_id: &str) -> Result<(), AccessApiError> {
        debug!(member_id = member_id, "Removing upstream ban");

        let response = self
            .client
            .delete(self.ban_url(member_id))
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Cookie", &self.cookie_header)
            .send()
            .await
            .map_err(|e| AccessApiError::Transport(format!("Request failed: {}", e)))?;

        Self::read_outcome(response).await
    }
}
