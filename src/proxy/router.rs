//! Backend classification
//!
//! Every inbound request goes to one of two upstream hosts. Carnage report
//! lookups are served by the stats host; everything else goes to the main
//! web host. The router also normalizes the outbound request so that nothing
//! hop-specific or client-controlled leaks upstream.

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::Method;
use std::fmt;
use url::Url;

use crate::http::is_hop_by_hop;
use crate::http::request::Request;
use crate::proxy::error::DispatchError;

/// Path fragment that routes a request to the stats backend
pub const CARNAGE_REPORT_MARKER: &str = "Destiny2/Stats/PostGameCarnageReport";

/// Upstream API domain used when none is configured
pub const DEFAULT_API_DOMAIN: &str = "bungie.net";

/// Upstream routing category, derived from the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendClass {
    /// `stats.<domain>`, carnage reports
    Stats,
    /// `www.<domain>`, everything else
    Web,
}

impl BackendClass {
    pub const ALL: [BackendClass; 2] = [BackendClass::Stats, BackendClass::Web];

    /// Classifies a request path. Never fails.
    pub fn from_path(path: &str) -> Self {
        if path.contains(CARNAGE_REPORT_MARKER) {
            BackendClass::Stats
        } else {
            BackendClass::Web
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendClass::Stats => "stats",
            BackendClass::Web => "www",
        }
    }

    /// Dense index for per-class tables.
    pub(crate) fn slot(self) -> usize {
        match self {
            BackendClass::Stats => 0,
            BackendClass::Web => 1,
        }
    }
}

impl fmt::Display for BackendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme and authority of each upstream host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstreams {
    scheme: String,
    stats: String,
    web: String,
}

impl Upstreams {
    /// Production upstreams: `https://stats.<domain>` and `https://www.<domain>`.
    pub fn for_domain(domain: &str) -> Self {
        Self {
            scheme: "https".to_string(),
            stats: format!("stats.{domain}"),
            web: format!("www.{domain}"),
        }
    }

    /// Explicit scheme and authorities.
    ///
    /// Note: This constructor is public for integration testing against a
    /// plain-HTTP mock upstream; the proxy itself always uses [`Upstreams::for_domain`].
    pub fn new(scheme: impl Into<String>, stats: impl Into<String>, web: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            stats: stats.into(),
            web: web.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self, class: BackendClass) -> &str {
        match class {
            BackendClass::Stats => &self.stats,
            BackendClass::Web => &self.web,
        }
    }
}

/// A request ready to be sent upstream
#[derive(Debug)]
pub struct OutboundRequest {
    pub class: BackendClass,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Maps inbound requests onto upstream requests
#[derive(Debug, Clone)]
pub struct BackendRouter {
    upstreams: Upstreams,
}

impl BackendRouter {
    pub fn new(upstreams: Upstreams) -> Self {
        Self { upstreams }
    }

    pub fn upstreams(&self) -> &Upstreams {
        &self.upstreams
    }

    /// Returns the backend class and upstream host for a path.
    pub fn classify(&self, path: &str) -> (BackendClass, &str) {
        let class = BackendClass::from_path(path);
        (class, self.upstreams.host(class))
    }

    /// Rewrites an inbound request for its upstream.
    ///
    /// The scheme is forced to the upstream scheme, the authority to the class
    /// host, and the following headers are dropped: `User-Agent`, any
    /// client-supplied `X-Forwarded-For`, `Host`, `Content-Length` and all
    /// hop-by-hop headers (including those named by `Connection`).
    pub fn route(&self, request: Request) -> Result<OutboundRequest, DispatchError> {
        let (class, host) = self.classify(&request.path);
        let url = self.target_url(host, &request.path)?;

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::USER_AGENT);
        headers.remove("x-forwarded-for");

        Ok(OutboundRequest {
            class,
            method: request.method,
            url,
            headers,
            body: request.body,
        })
    }

    fn target_url(&self, host: &str, path: &str) -> Result<Url, DispatchError> {
        // Only origin-form targets can be re-homed
        if !path.starts_with('/') {
            return Err(DispatchError::InvalidTarget(path.to_string()));
        }
        Url::parse(&format!("{}://{}{}", self.upstreams.scheme, host, path))
            .map_err(|_| DispatchError::InvalidTarget(path.to_string()))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    for name in listed {
        headers.remove(name.as_str());
    }

    let fixed: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in fixed {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_listed_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "X-Session, keep-alive".parse().unwrap());
        headers.insert("x-session", "abc".parse().unwrap());
        headers.insert("x-api-key", "k".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-session").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers.get("x-api-key").unwrap(), "k");
    }
}
