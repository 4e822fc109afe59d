//! Per-request dispatch failures
//!
//! None of these are fatal to the process: each one ends only the request
//! that produced it and becomes a gateway-style response.

use http::StatusCode;
use thiserror::Error;

use crate::http::response::Response;
use crate::proxy::limiter::Cancelled;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request target `{0}` cannot be forwarded")]
    InvalidTarget(String),

    #[error("request cancelled before the upstream answered")]
    Cancelled,

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl From<Cancelled> for DispatchError {
    fn from(_: Cancelled) -> Self {
        DispatchError::Cancelled
    }
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            DispatchError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Local response sent to the client in place of the upstream's.
    pub fn to_response(&self) -> Response {
        let detail = match self {
            DispatchError::InvalidTarget(_) => "Only origin-form request targets can be proxied.",
            DispatchError::Cancelled => "The request deadline elapsed before the upstream answered.",
            DispatchError::Upstream(e) if e.is_timeout() => "The upstream server did not respond in time.",
            DispatchError::Upstream(_) => "Failed to reach the upstream server.",
        };
        Response::error(self.status(), detail)
    }
}
