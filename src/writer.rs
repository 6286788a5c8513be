//! Response writers that compress the body on its way to the client.

use crate::codec::GzipEncoder;
use crate::pool::{Pool, Pooled};
use crate::response::{ResponseWriter, set_encoding_headers};
use bytes::BytesMut;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::io::{self, Write};
use std::sync::Arc;

/// Compresses every byte written, from the first one.
pub struct GzipWriter<W> {
    inner: W,
    encoder: Pooled<GzipEncoder>,
}

impl<W: ResponseWriter> GzipWriter<W> {
    /// Wraps `inner`, streaming through `encoder`.
    pub fn new(inner: W, encoder: Pooled<GzipEncoder>) -> Self {
        Self { inner, encoder }
    }

    /// Writes the gzip trailer, hands the encoder back to its pool and returns
    /// the wrapped sink.
    pub fn close(self) -> io::Result<W> {
        let GzipWriter {
            mut inner,
            mut encoder,
        } = self;
        encoder.finish(&mut inner)?;
        Ok(inner)
    }
}

impl<W: ResponseWriter> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.headers_mut().remove(header::CONTENT_LENGTH);
        self.encoder.write(&mut self.inner, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush(&mut self.inner)
    }
}

impl<W: ResponseWriter> ResponseWriter for GzipWriter<W> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.inner.headers_mut().remove(header::CONTENT_LENGTH);
        self.inner.write_header(status);
    }

    fn size(&self) -> usize {
        self.inner.size()
    }
}

enum State {
    Buffering(Pooled<BytesMut>),
    Compressing(Pooled<GzipEncoder>),
}

/// Holds the body back until `threshold` bytes have been written, then
/// switches to compression for the rest of the response.
///
/// A body that never reaches the threshold is sent as-is on
/// [`close`](Self::close). The switch happens at most once.
pub struct ThresholdWriter<W> {
    inner: W,
    state: State,
    encoders: Arc<Pool<GzipEncoder>>,
    threshold: usize,
}

impl<W: ResponseWriter> ThresholdWriter<W> {
    /// Wraps `inner`, accumulating into `buffer` until `threshold` is reached.
    ///
    /// An encoder is only taken from `encoders` once the threshold is crossed.
    pub fn new(
        inner: W,
        buffer: Pooled<BytesMut>,
        encoders: Arc<Pool<GzipEncoder>>,
        threshold: usize,
    ) -> Self {
        Self {
            inner,
            state: State::Buffering(buffer),
            encoders,
            threshold,
        }
    }

    /// Returns whether the body is being compressed.
    pub fn is_compressing(&self) -> bool {
        matches!(self.state, State::Compressing(_))
    }

    /// Number of bytes held back, waiting for the threshold.
    pub fn buffered(&self) -> usize {
        match &self.state {
            State::Buffering(buffer) => buffer.len(),
            State::Compressing(_) => 0,
        }
    }

    /// Completes the body and returns the wrapped sink.
    ///
    /// A compressed body gets its trailer. A body that stayed under the
    /// threshold is written out uncompressed, even when it is empty.
    pub fn close(self) -> io::Result<W> {
        let ThresholdWriter {
            mut inner, state, ..
        } = self;
        match state {
            State::Compressing(mut encoder) => encoder.finish(&mut inner)?,
            State::Buffering(buffer) => inner.write_all(&buffer)?,
        }
        Ok(inner)
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            State::Compressing(encoder) => encoder.write(&mut self.inner, data),
            State::Buffering(buffer) if buffer.len() + data.len() < self.threshold => {
                buffer.extend_from_slice(data);
                Ok(data.len())
            }
            State::Buffering(buffer) => {
                tracing::debug!(
                    buffered = buffer.len(),
                    incoming = data.len(),
                    threshold = self.threshold,
                    "compression threshold reached"
                );
                let mut encoder = self.encoders.acquire();
                set_encoding_headers(self.inner.headers_mut());

                // Buffered bytes go out first; new data only if they made it.
                let result = encoder
                    .write(&mut self.inner, &buffer[..])
                    .and_then(|_| encoder.write(&mut self.inner, data));

                // Replacing the state hands the buffer back to its pool.
                self.state = State::Compressing(encoder);
                result
            }
        }
    }
}

impl<W: ResponseWriter> Write for ThresholdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.headers_mut().remove(header::CONTENT_LENGTH);
        self.write_body(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Compressing(encoder) => encoder.flush(&mut self.inner),
            State::Buffering(_) => self.inner.flush(),
        }
    }
}

impl<W: ResponseWriter> ResponseWriter for ThresholdWriter<W> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.inner.headers_mut().remove(header::CONTENT_LENGTH);
        self.inner.write_header(status);
    }

    fn size(&self) -> usize {
        self.inner.size()
    }
}

/// The writer installed for a compressible request.
pub enum GzipResponseWriter<W> {
    /// Compresses from the first byte.
    Immediate(GzipWriter<W>),
    /// Decides once the size threshold is known to be crossed or not.
    Deferred(ThresholdWriter<W>),
}

impl<W: ResponseWriter> GzipResponseWriter<W> {
    /// Closes the writer and sets `Content-Length` to the number of bytes
    /// actually sent.
    pub fn finish(self) -> io::Result<W> {
        let mut inner = match self {
            GzipResponseWriter::Immediate(writer) => writer.close()?,
            GzipResponseWriter::Deferred(writer) => writer.close()?,
        };
        let size = inner.size();
        inner
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        Ok(inner)
    }

    fn as_writer(&mut self) -> &mut dyn ResponseWriter {
        match self {
            GzipResponseWriter::Immediate(writer) => writer,
            GzipResponseWriter::Deferred(writer) => writer,
        }
    }

    fn as_ref_writer(&self) -> &dyn ResponseWriter {
        match self {
            GzipResponseWriter::Immediate(writer) => writer,
            GzipResponseWriter::Deferred(writer) => writer,
        }
    }
}

impl<W: ResponseWriter> Write for GzipResponseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.as_writer().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.as_writer().flush()
    }
}

impl<W: ResponseWriter> ResponseWriter for GzipResponseWriter<W> {
    fn headers(&self) -> &HeaderMap {
        self.as_ref_writer().headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.as_writer().headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.as_writer().write_header(status)
    }

    fn size(&self) -> usize {
        self.as_ref_writer().size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressionLevel, DEFAULT_COMPRESSION};
    use crate::response::BufferedResponse;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn encoders() -> Arc<Pool<GzipEncoder>> {
        let level = CompressionLevel::new(DEFAULT_COMPRESSION).unwrap();
        Arc::new(Pool::new(move || GzipEncoder::new(level)))
    }

    fn buffers(threshold: usize) -> Arc<Pool<BytesMut>> {
        Arc::new(Pool::new(move || BytesMut::with_capacity(threshold)))
    }

    fn threshold_writer(
        threshold: usize,
        encoders: &Arc<Pool<GzipEncoder>>,
        buffers: &Arc<Pool<BytesMut>>,
    ) -> ThresholdWriter<BufferedResponse> {
        ThresholdWriter::new(
            BufferedResponse::new(),
            buffers.acquire(),
            Arc::clone(encoders),
            threshold,
        )
    }

    fn with_content_length(len: usize) -> BufferedResponse {
        let mut response = BufferedResponse::new();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        response
    }

    /// A sink whose client has gone away.
    #[derive(Default)]
    struct DisconnectedSink {
        headers: HeaderMap,
    }

    impl Write for DisconnectedSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ResponseWriter for DisconnectedSink {
        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_header(&mut self, _status: StatusCode) {}

        fn size(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_gzip_writer_compresses_from_first_byte() {
        let pool = encoders();
        let mut writer = GzipWriter::new(with_content_length(11), pool.acquire());
        writer.write_all(b"hello").unwrap();
        assert!(writer.headers().get(header::CONTENT_LENGTH).is_none());
        writer.write_all(b" world").unwrap();

        let inner = writer.close().unwrap();
        assert_eq!(gunzip(inner.body()), b"hello world");
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_gzip_writer_write_header() {
        let pool = encoders();
        let mut writer = GzipWriter::new(with_content_length(5), pool.acquire());
        writer.write_header(StatusCode::CREATED);
        assert!(writer.headers().get(header::CONTENT_LENGTH).is_none());

        let inner = writer.close().unwrap();
        assert_eq!(inner.status(), StatusCode::CREATED);
        assert!(gunzip(inner.body()).is_empty());
    }

    #[test]
    fn test_gzip_writer_size_is_compressed_size() {
        let pool = encoders();
        let mut writer = GzipWriter::new(BufferedResponse::new(), pool.acquire());
        writer.write_all(&[b'a'; 4096]).unwrap();
        writer.flush().unwrap();
        assert!(writer.size() > 0);
        assert!(writer.size() < 4096);
    }

    #[test]
    fn test_threshold_not_reached_passes_through() {
        let (encoders, buffers) = (encoders(), buffers(1024));
        let mut writer = threshold_writer(1024, &encoders, &buffers);
        writer.write_all(&[b'x'; 100]).unwrap();
        assert!(!writer.is_compressing());
        assert_eq!(writer.buffered(), 100);
        // Nothing reaches the client until the decision is made.
        assert_eq!(writer.size(), 0);

        let inner = writer.close().unwrap();
        assert_eq!(inner.body(), &[b'x'; 100][..]);
        assert!(inner.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(encoders.created(), 0);
        assert_eq!(buffers.idle(), 1);
    }

    #[test]
    fn test_threshold_crossed_across_writes() {
        let (encoders, buffers) = (encoders(), buffers(1024));
        let mut writer = threshold_writer(1024, &encoders, &buffers);

        let first = vec![b'a'; 600];
        let second = vec![b'b'; 600];
        writer.write_all(&first).unwrap();
        assert!(!writer.is_compressing());
        assert!(writer.headers().get(header::CONTENT_ENCODING).is_none());

        writer.write_all(&second).unwrap();
        assert!(writer.is_compressing());
        assert_eq!(writer.buffered(), 0);
        assert_eq!(writer.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        // The buffer is back in the pool as soon as compression starts.
        assert_eq!(buffers.idle(), 1);

        let inner = writer.close().unwrap();
        let body = gunzip(inner.body());
        assert_eq!(body.len(), 1200);
        assert_eq!(&body[..600], &first[..]);
        assert_eq!(&body[600..], &second[..]);
        assert_eq!(encoders.idle(), 1);
    }

    #[test]
    fn test_threshold_crossed_within_single_write() {
        let (encoders, buffers) = (encoders(), buffers(16));
        let mut writer = threshold_writer(16, &encoders, &buffers);
        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"abcdefghijklmnopqrstuvwxyz").unwrap();
        writer.write_all(b"!").unwrap();

        let inner = writer.close().unwrap();
        assert_eq!(
            gunzip(inner.body()),
            b"0123456789abcdefghijklmnopqrstuvwxyz!"
        );
    }

    #[test]
    fn test_threshold_exactly_reached_compresses() {
        let (encoders, buffers) = (encoders(), buffers(8));
        let mut writer = threshold_writer(8, &encoders, &buffers);
        writer.write_all(b"1234").unwrap();
        writer.write_all(b"5678").unwrap();
        assert!(writer.is_compressing());

        let inner = writer.close().unwrap();
        assert_eq!(gunzip(inner.body()), b"12345678");
    }

    #[test]
    fn test_never_returns_to_buffering() {
        let (encoders, buffers) = (encoders(), buffers(4));
        let mut writer = threshold_writer(4, &encoders, &buffers);
        writer.write_all(b"long enough").unwrap();
        assert!(writer.is_compressing());

        for _ in 0..10 {
            writer.write_all(b".").unwrap();
            assert!(writer.is_compressing());
            assert_eq!(writer.buffered(), 0);
        }
        assert_eq!(encoders.created(), 1);
    }

    #[test]
    fn test_close_without_writes() {
        let (encoders, buffers) = (encoders(), buffers(64));
        let writer = threshold_writer(64, &encoders, &buffers);
        let inner = writer.close().unwrap();
        assert!(inner.body().is_empty());
        assert_eq!(buffers.idle(), 1);
        assert_eq!(encoders.created(), 0);
    }

    #[test]
    fn test_threshold_write_header_removes_content_length() {
        let (encoders, buffers) = (encoders(), buffers(64));
        let mut writer = ThresholdWriter::new(
            with_content_length(3),
            buffers.acquire(),
            Arc::clone(&encoders),
            64,
        );
        writer.write_header(StatusCode::ACCEPTED);
        assert!(writer.headers().get(header::CONTENT_LENGTH).is_none());

        let inner = writer.close().unwrap();
        assert_eq!(inner.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_write_error_propagates_and_returns_resources() {
        let (encoders, buffers) = (encoders(), buffers(8));
        let mut writer = ThresholdWriter::new(
            DisconnectedSink::default(),
            buffers.acquire(),
            Arc::clone(&encoders),
            8,
        );
        writer.write_all(b"1234").unwrap();

        let err = writer.write_all(b"5678").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        // Compression state is kept after a failed write.
        assert!(writer.is_compressing());

        assert!(writer.close().is_err());
        assert_eq!(encoders.idle(), 1);
        assert_eq!(buffers.idle(), 1);
    }

    #[test]
    fn test_response_writer_finish_sets_content_length() {
        let (encoders, buffers) = (encoders(), buffers(1024));

        let mut deferred = GzipResponseWriter::Deferred(threshold_writer(1024, &encoders, &buffers));
        deferred.write_all(&[b'z'; 100]).unwrap();
        let inner = deferred.finish().unwrap();
        assert_eq!(inner.headers().get(header::CONTENT_LENGTH).unwrap(), "100");

        let mut immediate =
            GzipResponseWriter::Immediate(GzipWriter::new(BufferedResponse::new(), encoders.acquire()));
        immediate.write_all(&[b'z'; 100]).unwrap();
        let inner = immediate.finish().unwrap();
        let expected = inner.body().len().to_string();
        assert_eq!(
            inner.headers().get(header::CONTENT_LENGTH).unwrap(),
            expected.as_str()
        );
        assert_eq!(gunzip(inner.body()), vec![b'z'; 100]);
    }
}
