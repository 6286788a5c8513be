//! Configuration for the compression handler.

use crate::error::Error;
use bytes::Bytes;
use flate2::read::GzDecoder;
use http::{Request, header};
use regex::RegexSet;
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Extensions that are already compressed and skipped by default.
pub const DEFAULT_EXCLUDED_EXTENSIONS: [&str; 4] = [".png", ".gif", ".jpeg", ".jpg"];

/// Hook run on requests whose body is gzip encoded.
pub type DecompressFn<B> = Arc<dyn Fn(&mut Request<B>) + Send + Sync>;

/// File extensions (with the leading dot) whose responses are never compressed.
#[derive(Debug, Clone, Default)]
pub struct ExcludedExtensions(HashSet<String>);

impl ExcludedExtensions {
    /// Builds the set from extensions such as `".png"`.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(extensions.into_iter().map(Into::into).collect())
    }

    /// Returns whether `extension` is excluded.
    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(extension)
    }
}

/// Request paths whose responses are never compressed.
#[derive(Debug, Clone, Default)]
pub struct ExcludedPaths(HashSet<String>);

impl ExcludedPaths {
    /// Builds the set from exact paths such as `"/metrics"`.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    /// Returns whether `path` is excluded.
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }
}

/// Path patterns whose matching requests are never compressed.
#[derive(Debug, Clone)]
pub struct ExcludedPathRegexes(RegexSet);

impl ExcludedPathRegexes {
    /// Compiles the patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self(RegexSet::new(patterns)?))
    }

    /// Returns whether any pattern matches `path`.
    pub fn is_match(&self, path: &str) -> bool {
        self.0.is_match(path)
    }
}

impl Default for ExcludedPathRegexes {
    fn default() -> Self {
        Self(RegexSet::empty())
    }
}

/// Options for [`GzipHandler`](crate::GzipHandler) and
/// [`GzipLayer`](crate::GzipLayer).
///
/// `B` is the request body type seen by the decompression hook.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http_response_gzip::{ExcludedPathRegexes, GzipOptions, decompress_request};
///
/// let options = GzipOptions::<Bytes>::new()
///     .compression_size_threshold(1024)
///     .excluded_paths(["/metrics"])
///     .excluded_path_regexes(ExcludedPathRegexes::new(["^/downloads/"]).unwrap())
///     .decompress_fn(decompress_request);
/// ```
pub struct GzipOptions<B = Bytes> {
    pub(crate) excluded_extensions: ExcludedExtensions,
    pub(crate) excluded_paths: ExcludedPaths,
    pub(crate) excluded_path_regexes: ExcludedPathRegexes,
    pub(crate) compression_size_threshold: usize,
    pub(crate) decompress_fn: Option<DecompressFn<B>>,
}

impl<B> GzipOptions<B> {
    /// Creates options with the default exclusions and no threshold.
    pub fn new() -> Self {
        Self {
            excluded_extensions: ExcludedExtensions::new(DEFAULT_EXCLUDED_EXTENSIONS),
            excluded_paths: ExcludedPaths::default(),
            excluded_path_regexes: ExcludedPathRegexes::default(),
            compression_size_threshold: 0,
            decompress_fn: None,
        }
    }

    /// Replaces the excluded extensions (leading dot included, e.g. `".png"`).
    pub fn excluded_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_extensions = ExcludedExtensions::new(extensions);
        self
    }

    /// Sets request paths that are never compressed.
    pub fn excluded_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_paths = ExcludedPaths::new(paths);
        self
    }

    /// Sets path patterns that are never compressed.
    pub fn excluded_path_regexes(mut self, regexes: ExcludedPathRegexes) -> Self {
        self.excluded_path_regexes = regexes;
        self
    }

    /// Sets the body size at which compression starts.
    ///
    /// With `0` every response is compressed from the first byte. Otherwise
    /// the body is held back until this many bytes have been written and
    /// sent uncompressed if it ends before that.
    pub fn compression_size_threshold(mut self, threshold: usize) -> Self {
        self.compression_size_threshold = threshold;
        self
    }

    /// Sets the hook run on requests with `Content-Encoding: gzip`.
    pub fn decompress_fn<F>(mut self, decompress: F) -> Self
    where
        F: Fn(&mut Request<B>) + Send + Sync + 'static,
    {
        self.decompress_fn = Some(Arc::new(decompress));
        self
    }

    /// Returns the configured threshold.
    pub fn threshold(&self) -> usize {
        self.compression_size_threshold
    }
}

impl<B> Default for GzipOptions<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> Clone for GzipOptions<B> {
    fn clone(&self) -> Self {
        Self {
            excluded_extensions: self.excluded_extensions.clone(),
            excluded_paths: self.excluded_paths.clone(),
            excluded_path_regexes: self.excluded_path_regexes.clone(),
            compression_size_threshold: self.compression_size_threshold,
            decompress_fn: self.decompress_fn.clone(),
        }
    }
}

impl<B> fmt::Debug for GzipOptions<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipOptions")
            .field("excluded_extensions", &self.excluded_extensions)
            .field("excluded_paths", &self.excluded_paths)
            .field("excluded_path_regexes", &self.excluded_path_regexes)
            .field(
                "compression_size_threshold",
                &self.compression_size_threshold,
            )
            .field("decompress_fn", &self.decompress_fn.is_some())
            .finish()
    }
}

/// Largest decoded request body accepted by [`decompress_request`].
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 10 * 1024 * 1024;

/// Replaces a gzip-encoded request body with its decoded content.
///
/// `Content-Encoding` and `Content-Length` are removed once the body is
/// decoded. A body that fails to decode, or decodes to more than
/// [`DEFAULT_MAX_DECOMPRESSED_SIZE`] bytes, is left untouched.
pub fn decompress_request(req: &mut Request<Bytes>) {
    decompress_with_limit(req, DEFAULT_MAX_DECOMPRESSED_SIZE);
}

/// Returns a decompression hook like [`decompress_request`] that accepts at
/// most `limit` decoded bytes.
pub fn decompress_request_with_limit(limit: usize) -> impl Fn(&mut Request<Bytes>) + Send + Sync {
    move |req: &mut Request<Bytes>| decompress_with_limit(req, limit)
}

fn decompress_with_limit(req: &mut Request<Bytes>, limit: usize) {
    let mut decoded = Vec::new();
    let mut decoder = GzDecoder::new(req.body().as_ref()).take(limit as u64 + 1);
    if let Err(err) = decoder.read_to_end(&mut decoded) {
        tracing::warn!(error = %err, uri = %req.uri(), "failed to decompress request body");
        return;
    }
    if decoded.len() > limit {
        tracing::warn!(limit, uri = %req.uri(), "decompressed request body too large");
        return;
    }

    let headers = req.headers_mut();
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    *req.body_mut() = Bytes::from(decoded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_defaults() {
        let options = GzipOptions::<Bytes>::default();
        assert_eq!(options.threshold(), 0);
        for ext in DEFAULT_EXCLUDED_EXTENSIONS {
            assert!(options.excluded_extensions.contains(ext));
        }
        assert!(!options.excluded_extensions.contains(".html"));
        assert!(!options.excluded_path_regexes.is_match("/anything"));
        assert!(options.decompress_fn.is_none());
    }

    #[test]
    fn test_builder() {
        let options = GzipOptions::<Bytes>::new()
            .compression_size_threshold(2048)
            .excluded_extensions([".zip"])
            .excluded_paths(["/metrics", "/health"])
            .excluded_path_regexes(ExcludedPathRegexes::new([r"^/api/v\d+/stream"]).unwrap())
            .decompress_fn(|_req| {});

        assert_eq!(options.threshold(), 2048);
        assert!(options.excluded_extensions.contains(".zip"));
        assert!(!options.excluded_extensions.contains(".png"));
        assert!(options.excluded_paths.contains("/health"));
        assert!(!options.excluded_paths.contains("/health/live"));
        assert!(options.excluded_path_regexes.is_match("/api/v2/stream/events"));
        assert!(!options.excluded_path_regexes.is_match("/api/v2/users"));
        assert!(options.decompress_fn.is_some());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ExcludedPathRegexes::new(["("]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
    }

    #[test]
    fn test_decompress_request() {
        let body = gzip(b"{\"name\":\"gopher\"}");
        let mut req = Request::builder()
            .uri("/upload")
            .header(header::CONTENT_ENCODING, "gzip")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Bytes::from(body))
            .unwrap();

        decompress_request(&mut req);

        assert_eq!(req.body(), &Bytes::from_static(b"{\"name\":\"gopher\"}"));
        assert!(req.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(req.headers().get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_decompress_request_malformed_body() {
        let mut req = Request::builder()
            .uri("/upload")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Bytes::from_static(b"not gzip"))
            .unwrap();

        decompress_request(&mut req);

        assert_eq!(req.body(), &Bytes::from_static(b"not gzip"));
        assert_eq!(req.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn test_decompress_request_over_limit() {
        let body = gzip(&[b'a'; 4096]);
        let mut req = Request::builder()
            .uri("/upload")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Bytes::from(body.clone()))
            .unwrap();

        decompress_request_with_limit(1024)(&mut req);

        assert_eq!(req.body(), &Bytes::from(body));
        assert_eq!(req.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn test_decompress_request_at_limit() {
        let mut req = Request::builder()
            .uri("/upload")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Bytes::from(gzip(&[b'a'; 1024])))
            .unwrap();

        decompress_request_with_limit(1024)(&mut req);

        assert_eq!(req.body().len(), 1024);
        assert!(req.headers().get(header::CONTENT_ENCODING).is_none());
    }
}
