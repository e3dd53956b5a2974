//! Funding status cache
//!
//! Answers "what is this member's current funding/payment status" with
//! bounded staleness, minimizing live upstream calls:
//!
//! - **store**: the persisted keyed record store (MongoDB in production,
//!   in-memory for tests and dev mode)
//! - **funding**: the TTL/staleness policy, live refresh, stale fallback,
//!   expiry sweep and refresh-all housekeeping

pub mod funding;
pub mod store;

pub use funding::{CacheError, FundingFetcher, FundingResult, FundingStatusCache, LiveFunding, RefreshAllSummary};
pub use store::{CachedFundingRecord, FundingStore, MemoryFundingStore, MongoFundingStore, StoreError};
