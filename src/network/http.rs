//! Minimal HTTP/1.1 exchange over a dialed stream
//!
//! One request per connection: the request always carries
//! `Connection: close`, and the response body is framed by chunked encoding,
//! `Content-Length` or end of stream, in that order of preference.

use std::io;

use futures::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

use crate::error::{MixFetchError, Result};

/// Upper bound for the status line plus all headers
const MAX_HEAD_BYTES: usize = 16384;

/// Maximum number of header fields in a response
const MAX_HEADERS: usize = 128;

/// Upper bound for a chunk-size or trailer line
const MAX_LINE_BYTES: usize = 4096;

/// Upper bound for a response body, whatever its framing
const MAX_BODY_BYTES: usize = 64 << 20;

/// A fully read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Serialize a request head and body.
pub fn encode_request(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: Option<&[u8]>,
) -> Vec<u8> {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut host = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        host.push_str(&format!(":{port}"));
    }

    let mut out = format!("{method} {target} HTTP/1.1\r\nHost: {host}\r\n").into_bytes();

    for (name, value) in headers {
        if is_managed(name) {
            log::debug!("dropping caller supplied '{}' header", name);
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"Connection: close\r\n");
    match body {
        Some(body) => {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes())
        }
        None if method == Method::POST || method == Method::PUT => {
            out.extend_from_slice(b"Content-Length: 0\r\n")
        }
        None => {}
    }
    out.extend_from_slice(b"\r\n");

    if let Some(body) = body {
        out.extend_from_slice(body);
    }
    out
}

/// Headers we always set ourselves
fn is_managed(name: &HeaderName) -> bool {
    name == header::HOST
        || name == header::CONNECTION
        || name == header::CONTENT_LENGTH
        || name == header::TRANSFER_ENCODING
}

/// Read one response from `stream`. Interim `1xx` responses are skipped.
pub async fn read_response<S>(stream: S, method: &Method) -> Result<HttpResponse>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);

    let (version, status, reason, headers) = loop {
        let head = read_head(&mut reader).await?;
        let (version, status, reason, headers) = parse_head(&head)?;
        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            log::debug!("skipping interim {} response", status);
            continue;
        }
        break (version, status, reason, headers);
    };

    let body = if !has_body(method, status) {
        Vec::new()
    } else if is_chunked(&headers) {
        read_chunked(&mut reader, MAX_BODY_BYTES).await?
    } else if let Some(length) = content_length(&headers)? {
        read_exact_body(&mut reader, length, MAX_BODY_BYTES).await?
    } else {
        read_body_to_end(&mut reader, MAX_BODY_BYTES).await?
    };

    log::debug!("read {} response with {} byte body", status, body.len());

    Ok(HttpResponse {
        version,
        status,
        reason,
        headers,
        body,
    })
}

fn has_body(method: &Method, status: StatusCode) -> bool {
    !(method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>> {
    let Some(value) = headers.get(header::CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| {
            MixFetchError::MalformedResponse(format!("invalid Content-Length {value:?}"))
        })
}

/// Read up to and including the blank line ending the head.
async fn read_head<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let remaining = MAX_HEAD_BYTES.saturating_sub(head.len());
        if remaining == 0 {
            return Err(MixFetchError::MalformedResponse(
                "response head too large".to_string(),
            ));
        }

        let start = head.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut head)
            .await?;
        if n == 0 {
            return Err(MixFetchError::MalformedResponse(
                "connection closed before response head was complete".to_string(),
            ));
        }

        if head[start..] == *b"\r\n" || head[start..] == *b"\n" {
            if start == 0 {
                // stray blank line before the status line
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

fn parse_head(head: &[u8]) -> Result<(Version, StatusCode, String, HeaderMap)> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut raw_headers);
    if response.parse(head)?.is_partial() {
        return Err(MixFetchError::MalformedResponse(
            "incomplete response head".to_string(),
        ));
    }

    let code = response
        .code
        .ok_or_else(|| MixFetchError::MalformedResponse("missing status code".to_string()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| MixFetchError::MalformedResponse(format!("invalid status code {code}")))?;
    let version = match response.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let reason = response.reason.unwrap_or_default().to_string();

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for raw in response.headers.iter() {
        let name = HeaderName::from_bytes(raw.name.as_bytes()).map_err(|_| {
            MixFetchError::MalformedResponse(format!("invalid header name '{}'", raw.name))
        })?;
        let value = HeaderValue::from_bytes(raw.value).map_err(|_| {
            MixFetchError::MalformedResponse(format!("invalid value for header '{}'", raw.name))
        })?;
        headers.append(name, value);
    }

    Ok((version, status, reason, headers))
}

/// Running out of bytes mid-body is a framing error, anything else keeps its type.
fn body_error(err: io::Error) -> MixFetchError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        MixFetchError::MalformedResponse("response body truncated".to_string())
    } else {
        err.into()
    }
}

fn body_too_large(limit: usize) -> MixFetchError {
    MixFetchError::MalformedResponse(format!("response body exceeds {limit} bytes"))
}

async fn read_exact_body<R>(reader: &mut R, length: usize, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if length > limit {
        return Err(body_too_large(limit));
    }

    let mut body = Vec::with_capacity(length.min(MAX_HEAD_BYTES * 4));
    (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut body)
        .await?;
    if body.len() != length {
        return Err(MixFetchError::MalformedResponse(format!(
            "response body truncated ({} of {} bytes)",
            body.len(),
            length
        )));
    }
    Ok(body)
}

/// Body with no framing: everything until the remote closes.
async fn read_body_to_end<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    (&mut *reader)
        .take(limit as u64 + 1)
        .read_to_end(&mut body)
        .await?;
    if body.len() > limit {
        return Err(body_too_large(limit));
    }
    Ok(body)
}

/// Read a CRLF (or bare LF) terminated line, without the terminator.
async fn read_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Err(body_error(io::ErrorKind::UnexpectedEof.into()));
    }
    if line.pop() != Some(b'\n') {
        return Err(MixFetchError::MalformedResponse(
            "chunked framing line too long".to_string(),
        ));
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| MixFetchError::MalformedResponse("non UTF-8 chunked framing".to_string()))
}

async fn read_chunked<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        // chunk extensions are ignored
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16).map_err(|_| {
            MixFetchError::MalformedResponse(format!("invalid chunk size '{size}'"))
        })?;

        if size == 0 {
            // trailers are read and discarded
            while !read_line(reader).await?.is_empty() {}
            return Ok(body);
        }

        let end = body
            .len()
            .checked_add(size)
            .filter(|end| *end <= limit)
            .ok_or_else(|| body_too_large(limit))?;

        // the buffer grows only as chunk data arrives
        (&mut *reader)
            .take(size as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() != end {
            return Err(body_error(io::ErrorKind::UnexpectedEof.into()));
        }

        if !read_line(reader).await?.is_empty() {
            return Err(MixFetchError::MalformedResponse(
                "missing CRLF after chunk".to_string(),
            ));
        }
    }
}
