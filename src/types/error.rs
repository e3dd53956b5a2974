//! Error types for Gatekeeper

/// Main error type for Gatekeeper operations
///
/// Module-local error enums (`FetchError`, `CacheError`, ...) cover the
/// per-subsystem failure taxonomies; this type is for setup-level failures
/// that abort a whole operation (configuration, database, population load).
#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement From conversions for common error types

impl From<serde_json::Error> for GatekeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for GatekeeperError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<mongodb::error::Error> for GatekeeperError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for GatekeeperError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Auth(format!("Token error: {}", err))
    }
}

/// Result type alias for Gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;
