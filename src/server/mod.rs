//! Inbound server
//!
//! The accept loop and the per-request handler that sits between the HTTP
//! layer and the dispatch transport.

pub mod handler;
pub mod listener;

pub use handler::{Handler, Reply};
