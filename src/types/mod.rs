//! Shared types for Gatekeeper

pub mod error;

pub use error::{GatekeeperError, Result};
