use crate::codec::{CompressionLevel, GZIP_ENCODING, GzipEncoder};
use crate::error::Error;
use crate::filter;
use crate::options::GzipOptions;
use crate::pool::Pool;
use crate::response::{ResponseWriter, set_encoding_headers};
use crate::writer::{GzipResponseWriter, GzipWriter, ThresholdWriter};
use bytes::{Bytes, BytesMut};
use http::{Request, header};
use std::fmt;
use std::io;
use std::sync::Arc;

/// Owns the encoder and buffer pools and picks the writer for a response.
#[derive(Debug, Clone)]
pub struct Compressor {
    encoders: Arc<Pool<GzipEncoder>>,
    buffers: Arc<Pool<BytesMut>>,
    threshold: usize,
}

impl Compressor {
    /// Creates a compressor with empty pools.
    pub fn new(level: CompressionLevel, threshold: usize) -> Self {
        Self {
            encoders: Arc::new(Pool::new(move || GzipEncoder::new(level))),
            buffers: Arc::new(Pool::new(move || BytesMut::with_capacity(threshold))),
            threshold,
        }
    }

    /// Wraps `inner` in the writer for the configured threshold.
    ///
    /// Without a threshold, `Content-Encoding` and `Vary` are set right away
    /// and an encoder is taken from the pool. With one, only a buffer is
    /// taken; the headers are set if and when the threshold is crossed.
    pub fn wrap<W: ResponseWriter>(&self, mut inner: W) -> GzipResponseWriter<W> {
        if self.threshold == 0 {
            set_encoding_headers(inner.headers_mut());
            GzipResponseWriter::Immediate(GzipWriter::new(inner, self.encoders.acquire()))
        } else {
            GzipResponseWriter::Deferred(ThresholdWriter::new(
                inner,
                self.buffers.acquire(),
                Arc::clone(&self.encoders),
                self.threshold,
            ))
        }
    }

    /// Returns the encoder pool.
    pub fn encoders(&self) -> &Pool<GzipEncoder> {
        &self.encoders
    }

    /// Returns the accumulation buffer pool.
    pub fn buffers(&self) -> &Pool<BytesMut> {
        &self.buffers
    }
}

/// Compresses responses of eligible requests.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http::Request;
/// use http_response_gzip::{
///     BufferedResponse, DEFAULT_COMPRESSION, GzipHandler, GzipOptions, ResponseWriter,
/// };
/// use std::io::Write;
///
/// let handler = GzipHandler::new(DEFAULT_COMPRESSION, GzipOptions::new()).unwrap();
///
/// let mut req = Request::builder()
///     .uri("/hello")
///     .header("accept-encoding", "gzip")
///     .body(Bytes::new())
///     .unwrap();
/// let mut response = BufferedResponse::new();
///
/// handler
///     .handle(&mut req, &mut response, |_req, w| w.write_all(b"hello, world"))
///     .unwrap();
/// assert_eq!(response.headers()["content-encoding"], "gzip");
/// ```
pub struct GzipHandler<B = Bytes> {
    options: GzipOptions<B>,
    compressor: Compressor,
}

impl<B> GzipHandler<B> {
    /// Creates a handler compressing at `level`.
    ///
    /// Fails if `level` is not a valid gzip level.
    pub fn new(level: i32, options: GzipOptions<B>) -> Result<Self, Error> {
        let level = CompressionLevel::new(level)?;
        Ok(Self {
            compressor: Compressor::new(level, options.compression_size_threshold),
            options,
        })
    }

    /// Returns the handler's options.
    pub fn options(&self) -> &GzipOptions<B> {
        &self.options
    }

    /// Returns the compressor holding the pools.
    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Runs the decompression hook if one is set and the request body is gzip.
    pub fn decompress(&self, req: &mut Request<B>) {
        let Some(decompress) = &self.options.decompress_fn else {
            return;
        };
        let gzip_body = req
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(GZIP_ENCODING));
        if gzip_body {
            decompress(req);
        }
    }

    /// Decides whether the response to `req` may be compressed.
    pub fn should_compress(&self, req: &Request<B>) -> bool {
        filter::should_compress(req, &self.options)
    }

    /// Runs `next` with a compressing writer in place of `w`.
    ///
    /// Requests that may not be compressed reach `next` with `w` untouched.
    /// Otherwise the writer is closed after `next` returns, whether it
    /// succeeded, failed or panicked, and `Content-Length` is set to the number of bytes
    /// sent. An error from `next` takes precedence over one from closing.
    pub fn handle<E, F>(
        &self,
        req: &mut Request<B>,
        w: &mut dyn ResponseWriter,
        next: F,
    ) -> Result<(), E>
    where
        F: FnOnce(&mut Request<B>, &mut dyn ResponseWriter) -> Result<(), E>,
        E: From<io::Error>,
    {
        self.decompress(req);

        if !self.should_compress(req) {
            return next(req, w);
        }

        tracing::trace!(
            path = req.uri().path(),
            threshold = self.compressor.threshold,
            "compressing response"
        );
        let mut guard = FinishGuard(None);
        let writer = guard.0.insert(self.compressor.wrap(w));
        let outcome = next(req, writer);
        let finished = guard.finish();
        outcome?;
        finished?;
        Ok(())
    }
}

/// Finishes the installed writer when dropped, so a pipeline that panics
/// still leaves a complete body with a matching `Content-Length`.
struct FinishGuard<W: ResponseWriter>(Option<GzipResponseWriter<W>>);

impl<W: ResponseWriter> FinishGuard<W> {
    fn finish(mut self) -> io::Result<()> {
        match self.0.take() {
            Some(writer) => writer.finish().map(drop),
            None => Ok(()),
        }
    }
}

impl<W: ResponseWriter> Drop for FinishGuard<W> {
    fn drop(&mut self) {
        if let Some(writer) = self.0.take() {
            if let Err(err) = writer.finish() {
                tracing::debug!(error = %err, "failed to finish response while unwinding");
            }
        }
    }
}

impl<B> fmt::Debug for GzipHandler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipHandler")
            .field("options", &self.options)
            .field("compressor", &self.compressor)
            .finish()
    }
}
