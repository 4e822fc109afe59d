//! Outbound dispatch
//!
//! This module implements the core of the proxy: backend classification,
//! round-robin selection of a local egress address, per-address/per-class
//! token-bucket rate limiting, credential injection and the outbound call.

pub mod credential;
pub mod dispatch;
pub mod egress;
pub mod error;
pub mod limiter;
pub mod router;
pub mod stats;

pub use credential::CredentialInjector;
pub use dispatch::{DispatchCounter, DispatchTransport};
pub use egress::{EgressAddress, EgressAddressPool};
pub use error::DispatchError;
pub use limiter::{Cancelled, ClassQuota, QuotaTable, RateLimiterBank};
pub use router::{BackendClass, BackendRouter, Upstreams};
pub use stats::DispatchStats;
