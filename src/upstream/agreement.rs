//! Authenticated agreement/invoice fetch client
//!
//! Fetches one agreement's detailed invoice/payment data from the upstream
//! API. Before any network call the active session is validated and the
//! bearer token's embedded identity claims are cross-checked against it
//! (see [`crate::session`]); a mismatch fails immediately with no retry.
//!
//! Only transport failures, non-200 statuses and unparseable 200 bodies are
//! retried, with linear backoff. Retrying a scope mismatch would mask a
//! session-handling bug behind a retry loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::funding::{CacheError, FundingFetcher, LiveFunding};
use crate::session::{SessionContext, SessionError};
use crate::upstream::transport::AgreementTransport;

/// Upstream invoice status code meaning "past due"
pub const INVOICE_STATUS_PAST_DUE: i32 = 5;

/// Fetch-layer failure taxonomy
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Session precondition failed (missing context or scope mismatch).
    /// Never retried.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Caller passed an empty agreement id or token
    #[error("Invalid fetch request: {0}")]
    InvalidRequest(String),

    /// All retry attempts consumed
    #[error("Fetch exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// One invoice on an agreement, as upstream reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub amount: f64,
    pub status_code: i32,
    #[serde(default)]
    pub due_date: Option<String>,
}

impl Invoice {
    /// Whether upstream considers this invoice past due
    pub fn is_past_due(&self) -> bool {
        self.status_code == INVOICE_STATUS_PAST_DUE
    }
}

/// A scheduled future payment on an agreement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPayment {
    pub id: String,
    pub amount: f64,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// The structured body of a successful agreement-detail fetch.
///
/// Returned unchanged to the caller: interpreting invoices into a funding
/// status belongs to the cache layer, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementSnapshot {
    pub agreement_id: String,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub scheduled_payments: Vec<ScheduledPayment>,
}

impl AgreementSnapshot {
    /// Whether any invoice on this agreement is past due
    pub fn has_past_due_invoice(&self) -> bool {
        self.invoices.iter().any(Invoice::is_past_due)
    }
}

/// Authenticated fetch client for agreement detail
///
/// Purely functional given its inputs: no side effects beyond the network
/// call itself.
pub struct AgreementClient<T: AgreementTransport> {
    transport: Arc<T>,
    base_url: String,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl<T: AgreementTransport> AgreementClient<T> {
    pub fn new(
        transport: Arc<T>,
        base_url: impl Into<String>,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            // retry_attempts below 1 would mean "never even try"
            retry_attempts: retry_attempts.max(1),
            retry_backoff,
        }
    }

    /// Fetch one agreement's invoices and scheduled payments.
    ///
    /// Session validation and token scope checking happen before any
    /// network call; those failures are fatal for this call and carry no
    /// retry. Transport failures, non-200 statuses and unparseable bodies
    /// are retried with `retry_backoff * attempt_number` waits.
    pub async fn fetch(
        &self,
        agreement_id: &str,
        token: &str,
        session: &SessionContext,
    ) -> Result<AgreementSnapshot, FetchError> {
        if agreement_id.trim().is_empty() {
            return Err(FetchError::InvalidRequest("empty agreement id".into()));
        }
        if token.trim().is_empty() {
            return Err(FetchError::InvalidRequest("empty bearer token".into()));
        }

        session.validate()?;
        session.check_token_scope(token)?;

        let cookie_header = session.cookie_header();
        let mut last_error = String::new();

        for attempt in 1..=self.retry_attempts {
            // Per-attempt cache-busting timestamp keeps intermediaries from
            // replaying a stale agreement body
            let url = format!(
                "{}/api/v1/agreements/{}?include=invoices&include=scheduledPayments&_ts={}",
                self.base_url,
                urlencoding::encode(agreement_id),
                Utc::now().timestamp_millis()
            );

            match self.transport.get(&url, token, &cookie_header).await {
                Ok(response) if response.status == 200 => {
                    match serde_json::from_str::<AgreementSnapshot>(&response.body) {
                        Ok(snapshot) => {
                            debug!(
                                agreement_id = agreement_id,
                                invoices = snapshot.invoices.len(),
                                attempt = attempt,
                                "Agreement fetched"
                            );
                            return Ok(snapshot);
                        }
                        Err(e) => {
                            last_error = format!("Unparseable response body: {}", e);
                        }
                    }
                }
                Ok(response) => {
                    last_error = format!("HTTP {}", response.status);
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            warn!(
                agreement_id = agreement_id,
                attempt = attempt,
                max_attempts = self.retry_attempts,
                error = %last_error,
                "Agreement fetch attempt failed"
            );

            if attempt < self.retry_attempts {
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.retry_attempts,
            last_error,
        })
    }
}

/// Production [`FundingFetcher`]: resolves a member key to live funding
/// data through the authenticated agreement fetch.
///
/// The vendor issues one agreement per member, so the cache key doubles as
/// the agreement id. Funding status is "pastDue" when any invoice carries
/// the past-due status code, "current" otherwise; the full snapshot rides
/// along as the opaque package payload.
pub struct AgreementFundingFetcher<T: AgreementTransport> {
    client: AgreementClient<T>,
    session: SessionContext,
    bearer_token: String,
}

impl<T: AgreementTransport> AgreementFundingFetcher<T> {
    pub fn new(
        client: AgreementClient<T>,
        session: SessionContext,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            session,
            bearer_token: bearer_token.into(),
        }
    }
}

#[async_trait::async_trait]
impl<T: AgreementTransport> FundingFetcher for AgreementFundingFetcher<T> {
    async fn fetch_live(&self, member_key: &str) -> Result<LiveFunding, CacheError> {
        let snapshot = self
            .client
            .fetch(member_key, &self.bearer_token, &self.session)
            .await
            .map_err(|e| CacheError::RefreshFailed(e.to_string()))?;

        let funding_status = if snapshot.has_past_due_invoice() {
            "pastDue"
        } else {
            "current"
        };
        let package_details = serde_json::to_value(&snapshot)
            .map_err(|e| CacheError::RefreshFailed(format!("Snapshot serialization: {}", e)))?;

        Ok(LiveFunding {
            funding_status: funding_status.to_string(),
            package_details,
        })
    }
}
