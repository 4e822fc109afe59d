//! Egress Proxy - multi-address reverse proxy
//!
//! Core library for the HTTP layer and the outbound dispatch path.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
