//! Upstream vendor API clients
//!
//! Everything that talks to the upstream system of record lives here:
//!
//! - **transport**: the raw HTTP seam (trait + reqwest implementation)
//! - **agreement**: authenticated agreement/invoice fetch with scope
//!   validation, retry and backoff
//! - **access**: the ban/unban access-control API and the idempotency
//!   classification of its free-text error payloads

pub mod access;
pub mod agreement;
pub mod transport;

pub use access::{classify_upstream_error, AccessApi, AccessApiError, HttpAccessApi, UpstreamOutcome};
pub use agreement::{AgreementClient, AgreementFundingFetcher, AgreementSnapshot, FetchError, Invoice};
pub use transport::{AgreementTransport, ReqwestTransport, TransportError, TransportResponse};
