//! Gatekeeper - billing-to-access reconciliation for facility door control
//!
//! Gatekeeper reconciles a member's external billing status with their
//! physical access privileges at a facility, against an upstream system
//! that exposes agreement/invoice data through an authenticated,
//! session-scoped HTTP API.
//!
//! ## Services
//!
//! - **Upstream**: authenticated agreement/invoice fetch with scope
//!   validation and retry, plus the ban/unban access API
//! - **Cache**: TTL-based funding status cache with stale-fallback
//! - **Engine**: lock/unlock decision rules and idempotent batch
//!   reconciliation over the full member population
//! - **Directory**: member population queries (external collaborator
//!   boundary)

pub mod cache;
pub mod config;
pub mod directory;
pub mod engine;
pub mod session;
pub mod types;
pub mod upstream;

pub use config::Args;
pub use types::{GatekeeperError, Result};
