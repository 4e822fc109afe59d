use crate::http::request::Request;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Method;

/// Upper bound on the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a decoded request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound on the raw bytes of a chunked body, framing included.
const MAX_CHUNKED_BYTES: usize = MAX_BODY_BYTES + MAX_HEADER_BYTES;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidVersion,
    InvalidHeader,
    InvalidContentLength,
    UnsupportedTransferEncoding,
    InvalidChunk,
    HeadersTooLarge,
    BodyTooLarge,
    Incomplete,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_bytes(method_str.as_bytes())
        .map_err(|_| ParseError::InvalidMethod)?;

    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ParseError::InvalidVersion);
    }

    // Headers
    let mut headers = HeaderMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|_| ParseError::InvalidHeader)?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ParseError::InvalidHeader)?;

        headers.append(name, value);
    }

    // Body
    let (body, body_consumed) = if headers.contains_key(header::TRANSFER_ENCODING) {
        if headers.contains_key(header::CONTENT_LENGTH) {
            // Ambiguous framing
            return Err(ParseError::InvalidRequest);
        }
        if !is_chunked(&headers) {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        headers.remove(header::TRANSFER_ENCODING);
        match decode_chunked(body_bytes) {
            // Everything buffered so far belongs to this body
            Err(ParseError::Incomplete) if body_bytes.len() > MAX_CHUNKED_BYTES => {
                return Err(ParseError::BodyTooLarge);
            }
            decoded => decoded?,
        }
    } else {
        let content_length = content_length(&headers)?;

        if content_length > MAX_BODY_BYTES {
            return Err(ParseError::BodyTooLarge);
        }
        if body_bytes.len() < content_length {
            return Err(ParseError::Incomplete);
        }

        (body_bytes[..content_length].to_vec(), content_length)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body: Bytes::from(body),
    };

    let total_consumed = headers_end + 4 + body_consumed;
    Ok((request, total_consumed))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Finds the end of a chunk-size or trailer line, which must fit in
/// `MAX_HEADER_BYTES`.
fn find_line(buf: &[u8]) -> Result<usize, ParseError> {
    match find_crlf(buf) {
        Some(end) if end <= MAX_HEADER_BYTES => Ok(end),
        Some(_) => Err(ParseError::BodyTooLarge),
        None if buf.len() > MAX_HEADER_BYTES => Err(ParseError::BodyTooLarge),
        None => Err(ParseError::Incomplete),
    }
}

/// All Content-Length values must agree.
fn content_length(headers: &HeaderMap) -> Result<usize, ParseError> {
    let mut length = None;
    for value in headers.get_all(header::CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or(ParseError::InvalidContentLength)?;
        if length.is_some_and(|l| l != parsed) {
            return Err(ParseError::InvalidContentLength);
        }
        length = Some(parsed);
    }
    Ok(length.unwrap_or(0))
}

/// Chunked must be the final coding applied.
fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

/// Decodes a chunked body, returning the payload and the bytes consumed
/// including the terminating chunk and any trailers.
///
/// Payload is only copied once the whole body has arrived, so re-parsing a
/// growing buffer costs one pass over the chunk headers.
fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut chunks = Vec::new();
    let mut body_len = 0;
    let mut pos = 0;

    loop {
        let line_end = find_line(&buf[pos..])?;
        let line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| ParseError::InvalidChunk)?;
        // Chunk extensions are ignored
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ParseError::InvalidChunk)?;
        pos += line_end + 2;

        if size == 0 {
            // Trailers end with an empty line
            let trailers_start = pos;
            loop {
                let end = find_line(&buf[pos..])?;
                pos += end + 2;
                if end == 0 {
                    break;
                }
                if pos - trailers_start > MAX_HEADER_BYTES {
                    return Err(ParseError::BodyTooLarge);
                }
            }

            let mut body = Vec::with_capacity(body_len);
            for (start, end) in chunks {
                body.extend_from_slice(&buf[start..end]);
            }
            return Ok((body, pos));
        }

        if size > MAX_BODY_BYTES - body_len {
            return Err(ParseError::BodyTooLarge);
        }
        if buf.len() < pos + size + 2 {
            return Err(ParseError::Incomplete);
        }
        if &buf[pos + size..pos + size + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }

        chunks.push((pos, pos + size));
        body_len += size;
        pos += size + 2;
    }
}
