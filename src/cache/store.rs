//! Persisted funding record store
//!
//! A simple keyed store (member key -> funding snapshot + timestamps) that
//! survives process restarts. Writes are whole-record overwrites keyed by
//! member identity, so concurrent refreshes of different members are safe;
//! a concurrent refresh of the same member is last-writer-wins, acceptable
//! because the cached value is advisory, not authoritative.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Store-level failure (connection, query)
#[derive(Debug, thiserror::Error)]
#[error("Store error: {0}")]
pub struct StoreError(pub String);

/// One cached funding snapshot for a member.
///
/// Created or overwritten on every successful live fetch; never deleted
/// except by an explicit expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFundingRecord {
    /// Opaque member key (name and/or external id; lookup strategy is the
    /// collaborator's concern)
    pub member_key: String,
    /// Funding/payment status ("current", "pastDue", ...)
    pub funding_status: String,
    /// Opaque package payload from upstream
    pub package_details: serde_json::Value,
    pub last_updated: DateTime<Utc>,
    /// last_updated + TTL
    pub cache_expiry: DateTime<Utc>,
}

impl CachedFundingRecord {
    /// Build a fresh record stamped now, expiring after `ttl`
    pub fn new(
        member_key: impl Into<String>,
        funding_status: impl Into<String>,
        package_details: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            member_key: member_key.into(),
            funding_status: funding_status.into(),
            package_details,
            last_updated: now,
            cache_expiry: now + ttl,
        }
    }

    /// A record is stale iff now is past its expiry, irrespective of
    /// last_updated
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.cache_expiry
    }
}

/// Trait for the backing record store (allows mocking in tests)
#[async_trait]
pub trait FundingStore: Send + Sync {
    async fn get(&self, member_key: &str) -> Result<Option<CachedFundingRecord>, StoreError>;

    /// Whole-record overwrite keyed by member key
    async fn put(&self, record: CachedFundingRecord) -> Result<(), StoreError>;

    /// Returns true if a record existed
    async fn delete(&self, member_key: &str) -> Result<bool, StoreError>;

    async fn all_keys(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// In-memory store (tests, dev mode)
// ============================================================================

/// Non-persistent store for tests and dev mode
#[derive(Default)]
pub struct MemoryFundingStore {
    records: DashMap<String, CachedFundingRecord>,
}

impl MemoryFundingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FundingStore for MemoryFundingStore {
    async fn get(&self, member_key: &str) -> Result<Option<CachedFundingRecord>, StoreError> {
        Ok(self.records.get(member_key).map(|r| r.value().clone()))
    }

    async fn put(&self, record: CachedFundingRecord) -> Result<(), StoreError> {
        self.records.insert(record.member_key.clone(), record);
        Ok(())
    }

    async fn delete(&self, member_key: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(member_key).is_some())
    }

    async fn all_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.iter().map(|r| r.key().clone()).collect())
    }
}

// ============================================================================
// MongoDB store
// ============================================================================

/// Persisted store backed by a MongoDB collection
#[derive(Clone)]
pub struct MongoFundingStore {
    collection: Collection<CachedFundingRecord>,
}

impl MongoFundingStore {
    /// Connect and select the funding cache collection
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!("Connecting to MongoDB at {}", uri);

        // serverSelectionTimeoutMS avoids hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            collection: client
                .database(db_name)
                .collection::<CachedFundingRecord>("funding_cache"),
        })
    }
}

#[async_trait]
impl FundingStore for MongoFundingStore {
    async fn get(&self, member_key: &str) -> Result<Option<CachedFundingRecord>, StoreError> {
        self.collection
            .find_one(doc! { "memberKey": member_key })
            .await
            .map_err(|e| StoreError(format!("Find failed: {}", e)))
    }

    async fn put(&self, record: CachedFundingRecord) -> Result<(), StoreError> {
        self.collection
            .replace_one(doc! { "memberKey": &record.member_key }, &record)
            .upsert(true)
            .await
            .map_err(|e| StoreError(format!("Upsert failed: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, member_key: &str) -> Result<bool, StoreError> {
        let result = self
            .collection
            .delete_one(doc! { "memberKey": member_key })
            .await
            .map_err(|e| StoreError(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count > 0)
    }

    async fn all_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut cursor = self
            .collection
            .find(doc! {})
            .await
            .map_err(|e| StoreError(format!("Find failed: {}", e)))?;

        let mut keys = Vec::new();
        while let Some(record) = cursor.next().await {
            match record {
                Ok(r) => keys.push(r.member_key),
                Err(e) => error!("Error reading cached record: {}", e),
            }
        }
        Ok(keys)
    }
}
