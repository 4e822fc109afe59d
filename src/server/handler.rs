use http::header::HeaderName;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::dispatch::DispatchTransport;

/// Body returned to liveness probes
pub const PROBE_BODY: &str = "ok";

/// What the connection should write back
#[derive(Debug)]
pub enum Reply {
    /// Generated by the proxy (probe answer or error page)
    Local(Response),
    /// Upstream response, streamed through unmodified
    Upstream(reqwest::Response),
}

/// Per-request entry point shared by all connections
pub struct Handler {
    transport: Arc<DispatchTransport>,
    probe_header: HeaderName,
    request_timeout: Duration,
}

impl Handler {
    pub fn new(
        transport: Arc<DispatchTransport>,
        probe_header: HeaderName,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            probe_header,
            request_timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let transport = DispatchTransport::from_config(cfg)?;
        Ok(Self::new(
            Arc::new(transport),
            cfg.probe_header.clone(),
            cfg.request_timeout,
        ))
    }

    pub fn transport(&self) -> &Arc<DispatchTransport> {
        &self.transport
    }

    /// Deadline applied to each proxied request
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// True when the request carries a non-empty probe header.
    pub fn is_probe(&self, request: &Request) -> bool {
        request
            .headers
            .get(&self.probe_header)
            .is_some_and(|v| !v.is_empty())
    }

    /// Answers probes locally and dispatches everything else.
    ///
    /// Dispatch errors become gateway-style responses; they never escape
    /// this request.
    pub async fn handle(&self, request: Request, cancel: &CancellationToken) -> Reply {
        if self.is_probe(&request) {
            debug!(method = %request.method, path = %request.path, "Liveness probe");
            return Reply::Local(Response::ok(PROBE_BODY));
        }

        let method = request.method.clone();
        let path = request.path.clone();

        match self.transport.dispatch(request, cancel).await {
            Ok(response) => Reply::Upstream(response),
            Err(e) => {
                info!(
                    method = %method,
                    path = %path,
                    status = e.status().as_u16(),
                    error = %e,
                    "Request not forwarded"
                );
                Reply::Local(e.to_response())
            }
        }
    }
}
