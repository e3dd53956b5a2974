//! Funding status lookup with staleness and live-fallback semantics
//!
//! Upstream billing calls are expensive and rate-sensitive. A fresh cached
//! record is served immediately; a miss or stale record triggers a live
//! refresh; a failed refresh falls back to the stale record (degraded but
//! available) rather than failing hard. No data at all is a valid "unknown"
//! result, not an error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::cache::store::{CachedFundingRecord, FundingStore, StoreError};

/// Cache-layer failure taxonomy
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Live upstream refresh failed
    #[error("Live refresh failed: {0}")]
    RefreshFailed(String),

    /// The backing store itself failed (setup-level)
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fresh funding data produced by a live upstream fetch
#[derive(Debug, Clone)]
pub struct LiveFunding {
    pub funding_status: String,
    pub package_details: serde_json::Value,
}

/// Trait for resolving a member key to live funding data (allows mocking
/// in tests). The production implementation drives the authenticated
/// agreement fetch client.
#[async_trait]
pub trait FundingFetcher: Send + Sync {
    async fn fetch_live(&self, member_key: &str) -> Result<LiveFunding, CacheError>;
}

/// A funding lookup answer, tagged with its provenance
#[derive(Debug, Clone)]
pub struct FundingResult {
    pub record: CachedFundingRecord,
    /// Served from the cache rather than a live fetch
    pub is_cached: bool,
    /// Served past its expiry as a degraded fallback
    pub is_stale: bool,
}

/// Summary of a refresh-all housekeeping pass
#[derive(Debug, Clone, Default)]
pub struct RefreshAllSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// TTL-based funding status cache keyed by member identity.
///
/// Exclusively owns its records: callers never mutate a
/// [`CachedFundingRecord`] directly.
pub struct FundingStatusCache {
    store: Arc<dyn FundingStore>,
    fetcher: Arc<dyn FundingFetcher>,
    ttl: Duration,
}

impl FundingStatusCache {
    /// Default TTL: 24 hours
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    pub fn new(store: Arc<dyn FundingStore>, fetcher: Arc<dyn FundingFetcher>, ttl: Duration) -> Self {
        Self { store, fetcher, ttl }
    }

    /// Look up a member's funding status.
    ///
    /// Serves a fresh cached record immediately unless `force_live` is set;
    /// otherwise attempts a live refresh, falling back to a stale record
    /// when not forced. `Ok(None)` is the no-data condition: cache and live
    /// fetch both unavailable, caller decides.
    pub async fn lookup(
        &self,
        member_key: &str,
        force_live: bool,
    ) -> Result<Option<FundingResult>, CacheError> {
        let cached = self.store.get(member_key).await?;

        if !force_live {
            if let Some(record) = &cached {
                if !record.is_stale(Utc::now()) {
                    debug!(member_key = member_key, "Funding cache hit (fresh)");
                    return Ok(Some(FundingResult {
                        record: record.clone(),
                        is_cached: true,
                        is_stale: false,
                    }));
                }
            }
        }

        // Forced, miss, or stale: try a live refresh
        match self.refresh(member_key).await {
            Ok(record) => Ok(Some(FundingResult {
                record,
                is_cached: false,
                is_stale: false,
            })),
            Err(e) => {
                if !force_live {
                    if let Some(record) = cached {
                        warn!(
                            member_key = member_key,
                            error = %e,
                            "Live refresh failed, serving stale cached record"
                        );
                        return Ok(Some(FundingResult {
                            record,
                            is_cached: true,
                            is_stale: true,
                        }));
                    }
                }
                warn!(member_key = member_key, error = %e, "No funding data available");
                Ok(None)
            }
        }
    }

    /// Fetch live data and overwrite the cache entry with a fresh TTL
    async fn refresh(&self, member_key: &str) -> Result<CachedFundingRecord, CacheError> {
        let live = self.fetcher.fetch_live(member_key).await?;

        let record = CachedFundingRecord::new(
            member_key,
            live.funding_status,
            live.package_details,
            self.ttl,
        );
        self.store.put(record.clone()).await?;

        debug!(member_key = member_key, status = %record.funding_status, "Funding cache refreshed");
        Ok(record)
    }

    /// Delete all records past their expiry. Maintenance, not part of the
    /// lookup hot path; may run on any schedule.
    pub async fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;

        for key in self.store.all_keys().await? {
            if let Some(record) = self.store.get(&key).await? {
                if record.is_stale(now) && self.store.delete(&key).await? {
                    removed += 1;
                }
            }
        }

        info!(removed = removed, "Expired funding records swept");
        Ok(removed)
    }

    /// Force a live re-fetch of every cached entry, independent of
    /// individual staleness. Per-entry failures never abort the batch.
    pub async fn refresh_all(&self) -> Result<RefreshAllSummary, CacheError> {
        let mut summary = RefreshAllSummary::default();

        for key in self.store.all_keys().await? {
            match self.refresh(&key).await {
                Ok(_) => summary.refreshed += 1,
                Err(e) => {
                    warn!(member_key = %key, error = %e, "Refresh-all entry failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            "Funding cache refresh-all completed"
        );
        Ok(summary)
    }
}
