//! The response sink abstraction the compression writers decorate.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::io;

/// A response sink: the body is written through [`io::Write`], the status
/// through [`write_header`](Self::write_header).
///
/// Raw sinks and every compression wrapper implement this trait, so a handler
/// cannot tell whether it is writing to the client or through a compressor.
pub trait ResponseWriter: io::Write {
    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for modification.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the response status.
    fn write_header(&mut self, status: StatusCode);

    /// Number of body bytes the underlying sink has accepted.
    fn size(&self) -> usize;
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        (**self).write_header(status)
    }

    fn size(&self) -> usize {
        (**self).size()
    }
}

/// An in-memory response.
///
/// Headers stay editable until the response is taken apart with
/// [`into_parts`](Self::into_parts), which is what lets the compression
/// handler correct `Content-Length` after the body is complete.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    wrote_header: bool,
}

impl BufferedResponse {
    /// Creates an empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty response carrying the given headers.
    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the body written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns whether the status has been committed.
    pub fn written(&self) -> bool {
        self.wrote_header
    }

    /// Splits the response into its status, headers and body.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body.freeze())
    }
}

impl io::Write for BufferedResponse {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wrote_header = true;
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.wrote_header {
            tracing::debug!(
                current = %self.status,
                ignored = %status,
                "response status already written"
            );
            return;
        }
        self.status = status;
        self.wrote_header = true;
    }

    fn size(&self) -> usize {
        self.body.len()
    }
}

/// Announces a gzip body: sets `Content-Encoding` and adds `Accept-Encoding`
/// to `Vary`.
pub(crate) fn set_encoding_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::CONTENT_ENCODING,
        header::HeaderValue::from_static(crate::codec::GZIP_ENCODING),
    );
    add_vary_accept_encoding(headers);
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let covered = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|name| name == "*" || name.eq_ignore_ascii_case("accept-encoding"));
    if !covered {
        headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
    }
}
