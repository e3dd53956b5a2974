//! Configuration for Gatekeeper
//!
//! CLI arguments and environment variable handling using clap. Session
//! identifiers and the bearer token arrive here already obtained: how the
//! upstream login flow produces them is an external collaborator's concern.

use clap::Parser;
use uuid::Uuid;

use crate::session::SessionContext;

/// Gatekeeper - billing-to-access reconciliation for facility door control
#[derive(Parser, Debug, Clone)]
#[command(name = "gatekeeper")]
#[command(about = "Reconciles member billing status with facility access privileges")]
pub struct Args {
    /// Unique identifier for this reconciliation run
    #[arg(long, env = "RUN_ID", default_value_t = Uuid::new_v4())]
    pub run_id: Uuid,

    /// Upstream API base URL
    #[arg(long, env = "UPSTREAM_URL", default_value = "https://api.clubvendor.example")]
    pub upstream_url: String,

    /// Per-request timeout in seconds for upstream calls
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Fetch retry attempts (must be at least 1)
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    pub retry_attempts: u32,

    /// Base fetch retry backoff in milliseconds (waits backoff * attempt)
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "1000")]
    pub retry_backoff_ms: u64,

    /// Funding cache TTL in hours
    #[arg(long, env = "CACHE_TTL_HOURS", default_value = "24")]
    pub cache_ttl_hours: i64,

    /// MongoDB connection URI for the persisted funding cache
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "gatekeeper")]
    pub mongodb_db: String,

    /// Upstream bearer token for API calls
    #[arg(long, env = "UPSTREAM_BEARER_TOKEN", default_value = "")]
    pub bearer_token: String,

    /// Active session id cookie value
    #[arg(long, env = "SESSION_ID", default_value = "")]
    pub session_id: String,

    /// Delegated-user id cookie value
    #[arg(long, env = "DELEGATED_USER_ID", default_value = "")]
    pub delegated_user_id: String,

    /// Logged-in-user id cookie value
    #[arg(long, env = "LOGGED_IN_USER_ID", default_value = "")]
    pub logged_in_user_id: String,

    /// Session access token cookie value
    #[arg(long, env = "SESSION_ACCESS_TOKEN", default_value = "")]
    pub access_token: String,

    /// Operator name recorded in upstream ban attribution notes
    #[arg(long, env = "OPERATOR_NAME", default_value = "gatekeeper")]
    pub operator: String,

    /// Enable development mode (in-memory cache fallback when MongoDB is
    /// unreachable, relaxed credential validation)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Also run the unlock pass for settled members
    #[arg(long, env = "UNLOCK_PASS", default_value = "true")]
    pub unlock_pass: bool,

    /// Sweep expired funding cache records after the reconciliation passes
    #[arg(long, env = "SWEEP_EXPIRED", default_value = "true")]
    pub sweep_expired: bool,
}

impl Args {
    /// Build the session context from the configured identifiers
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            session_id: self.session_id.clone(),
            delegated_user_id: self.delegated_user_id.clone(),
            logged_in_user_id: self.logged_in_user_id.clone(),
            access_token: self.access_token.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.retry_attempts < 1 {
            return Err("RETRY_ATTEMPTS must be at least 1".to_string());
        }

        if self.cache_ttl_hours < 1 {
            return Err("CACHE_TTL_HOURS must be at least 1".to_string());
        }

        if !self.dev_mode {
            if self.bearer_token.trim().is_empty() {
                return Err("UPSTREAM_BEARER_TOKEN is required in production mode".to_string());
            }
            if let Err(e) = self.session_context().validate() {
                return Err(e.to_string());
            }
        }

        Ok(())
    }
}
