//! Inbound HTTP/1.1
//!
//! The proxy speaks HTTP/1.1 to its clients with its own small parser and
//! writer. Upstream traffic goes through `reqwest`; only framing is rebuilt
//! on the way back, never content.
//!
//! - `connection`: per-socket state machine, deadline and disconnect watch
//! - `parser`: request heads plus `Content-Length` or chunked bodies
//! - `request`: parsed request and its builder
//! - `response`: probe answers and error pages made by the proxy
//! - `writer`: writes local responses and streams upstream ones
//!
//! # Connection State Machine
//!
//! One task drives each client socket through these states:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Probe check or upstream dispatch,
//!        └──────┬───────────┘   watching for client disconnect
//!               │ Reply ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send or stream response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

/// Headers that describe a single transport hop and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns true for header names that only apply to one connection.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
