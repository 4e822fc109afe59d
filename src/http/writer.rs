use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::is_hop_by_hop;
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

fn status_line(status: StatusCode) -> String {
    format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
}

/// `Connection` header for the response, if the default needs overriding.
///
/// HTTP/1.1 keeps the connection open unless told otherwise; HTTP/1.0 closes
/// it unless told otherwise.
fn connection_header(keep_alive: bool, http11: bool) -> Option<&'static [u8]> {
    match (keep_alive, http11) {
        (false, _) => Some(&b"connection: close\r\n"[..]),
        (true, false) => Some(&b"connection: keep-alive\r\n"[..]),
        (true, true) => None,
    }
}

fn serialize_response(resp: &Response, framing: Framing) -> Vec<u8> {
    let mut buf = Vec::new();

    // Status line
    buf.extend_from_slice(status_line(resp.status).as_bytes());

    // Headers
    for (name, value) in &resp.headers {
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    if let Some(line) = connection_header(framing.keep_alive, framing.chunked) {
        buf.extend_from_slice(line);
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

/// Writes a locally generated response.
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response, framing: Framing) -> Self {
        Self {
            buffer: serialize_response(response, framing),
            written: 0,
        }
    }

    pub async fn write_to_stream<W: AsyncWrite + Unpin>(
        &mut self,
        stream: &mut W,
    ) -> anyhow::Result<()> {
        while self.written < self.buffer.len() {
            let n = stream
                .write(&self.buffer[self.written..])
                .await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }
        stream.flush().await?;

        Ok(())
    }
}

/// How an upstream response may be framed for the inbound client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Client asked to keep the connection open
    pub keep_alive: bool,
    /// Inbound request was HEAD
    pub head_only: bool,
    /// Client speaks HTTP/1.1: chunked coding and persistent connections
    /// by default
    pub chunked: bool,
}

/// Streams an upstream response to the client without buffering the body.
///
/// Status, end-to-end headers and body bytes are passed through as received.
/// Only framing is regenerated: an upstream `Content-Length` is kept, a body
/// without one is re-chunked for HTTP/1.1 clients or delimited by closing
/// the connection otherwise.
///
/// Returns whether the connection can stay open afterwards.
pub async fn stream_upstream<W: AsyncWrite + Unpin>(
    stream: &mut W,
    mut upstream: reqwest::Response,
    framing: Framing,
) -> anyhow::Result<bool> {
    let status = upstream.status();
    let has_body = !framing.head_only
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED;
    let has_length = upstream.headers().contains_key(http::header::CONTENT_LENGTH);
    let chunked = has_body && !has_length && framing.chunked;
    let keep_alive = framing.keep_alive && (!has_body || has_length || chunked);

    let mut head = status_line(status).into_bytes();
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if chunked {
        head.extend_from_slice(b"transfer-encoding: chunked\r\n");
    }
    if let Some(line) = connection_header(keep_alive, framing.chunked) {
        head.extend_from_slice(line);
    }
    head.extend_from_slice(b"\r\n");
    stream.write_all(&head).await?;

    if has_body {
        while let Some(chunk) = upstream.chunk().await? {
            if chunk.is_empty() {
                continue;
            }
            if chunked {
                stream.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await?;
                stream.write_all(&chunk).await?;
                stream.write_all(b"\r\n").await?;
            } else {
                stream.write_all(&chunk).await?;
            }
        }
        if chunked {
            stream.write_all(b"0\r\n\r\n").await?;
        }
    }

    stream.flush().await?;
    Ok(keep_alive)
}
