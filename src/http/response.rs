use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

const TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");

/// A response produced by the proxy itself: probe answers and error pages.
///
/// Upstream responses never pass through this type; they are streamed by
/// [`crate::http::writer::stream_upstream`].
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Fluent builder for [`Response`].
///
/// # Example
///
/// ```
/// # use egress_proxy::http::response::ResponseBuilder;
/// # use http::{header, HeaderValue, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
///     .body("{}")
///     .build();
/// assert_eq!(response.headers[header::CONTENT_LENGTH], "2");
/// ```
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Sets a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the response, filling in `Content-Length` unless one was set.
    pub fn build(mut self) -> Response {
        self.headers
            .entry(header::CONTENT_LENGTH)
            .or_insert_with(|| HeaderValue::from(self.body.len()));

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// `200 OK` with a plain-text body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK)
            .header(header::CONTENT_TYPE, TEXT_PLAIN)
            .body(body)
            .build()
    }

    /// Plain-text error page: the status line followed by a detail sentence.
    pub fn error(status: StatusCode, detail: &str) -> Self {
        let body = format!(
            "{} {}\r\n\r\n{}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            detail
        );
        ResponseBuilder::new(status)
            .header(header::CONTENT_TYPE, TEXT_PLAIN)
            .body(body)
            .build()
    }

    pub fn bad_request() -> Self {
        Self::error(StatusCode::BAD_REQUEST, "The request could not be parsed.")
    }
}
