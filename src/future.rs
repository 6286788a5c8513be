use crate::body::GzipBody;
use crate::handler::Compressor;
use crate::response::{BufferedResponse, ResponseWriter};
use crate::writer::GzipResponseWriter;
use bytes::Buf;
use http::response::Parts;
use http::{HeaderMap, Response, StatusCode, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::io::{self, Write};
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tower::BoxError;

pin_project! {
    /// Future for [`GzipService`](crate::GzipService) responses.
    ///
    /// For eligible requests the inner response is written through the
    /// compression writer frame by frame and resolved once its body ends.
    #[project = ResponseFutureProj]
    #[allow(missing_docs)]
    pub enum ResponseFuture<F, B> {
        Passthrough {
            #[pin]
            inner: F,
        },
        Waiting {
            #[pin]
            inner: F,
            compressor: Compressor,
        },
        Draining {
            #[pin]
            body: B,
            parts: Option<Parts>,
            writer: Option<GzipResponseWriter<BufferedResponse>>,
            trailers: Option<HeaderMap>,
        },
        Done,
    }
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn passthrough(inner: F) -> Self {
        Self::Passthrough { inner }
    }

    pub(crate) fn compressed(inner: F, compressor: Compressor) -> Self {
        Self::Waiting { inner, compressor }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
    B: Body,
    B::Error: Into<BoxError>,
{
    type Output = Result<Response<GzipBody<B>>, BoxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match self.as_mut().project() {
                ResponseFutureProj::Passthrough { inner } => {
                    let result = ready!(inner.poll(cx));
                    self.set(ResponseFuture::Done);
                    let response = result.map_err(Into::into)?;
                    return Poll::Ready(Ok(response.map(GzipBody::passthrough)));
                }
                ResponseFutureProj::Waiting { inner, compressor } => {
                    let result = ready!(inner.poll(cx));
                    let compressor = compressor.clone();
                    self.set(ResponseFuture::Done);
                    let (mut parts, body) = result.map_err(Into::into)?.into_parts();
                    if !is_compressible(&parts) {
                        tracing::trace!(status = %parts.status, "response not compressible");
                        return Poll::Ready(Ok(Response::from_parts(
                            parts,
                            GzipBody::passthrough(body),
                        )));
                    }

                    let sink = BufferedResponse::with_headers(mem::take(&mut parts.headers));
                    let mut writer = compressor.wrap(sink);
                    writer.write_header(parts.status);
                    self.set(ResponseFuture::Draining {
                        body,
                        parts: Some(parts),
                        writer: Some(writer),
                        trailers: None,
                    });
                }
                ResponseFutureProj::Draining {
                    body,
                    parts,
                    writer,
                    trailers,
                } => match ready!(body.poll_frame(cx)) {
                    Some(Ok(frame)) => {
                        let frame = match frame.into_data() {
                            Ok(data) => {
                                let written = match writer.as_mut() {
                                    Some(writer) => write_buf(writer, data),
                                    None => Ok(()),
                                };
                                if let Err(e) = written {
                                    self.set(ResponseFuture::Done);
                                    return Poll::Ready(Err(e.into()));
                                }
                                continue;
                            }
                            Err(frame) => frame,
                        };
                        if let Ok(frame_trailers) = frame.into_trailers() {
                            trailers
                                .get_or_insert_with(HeaderMap::new)
                                .extend(frame_trailers);
                        }
                    }
                    Some(Err(e)) => {
                        self.set(ResponseFuture::Done);
                        return Poll::Ready(Err(e.into()));
                    }
                    None => {
                        let parts = parts.take();
                        let writer = writer.take();
                        let trailers = trailers.take();
                        self.set(ResponseFuture::Done);
                        let (Some(parts), Some(writer)) = (parts, writer) else {
                            return Poll::Ready(Err("response already completed".into()));
                        };
                        return Poll::Ready(finish(parts, writer, trailers));
                    }
                },
                ResponseFutureProj::Done => {
                    panic!("`ResponseFuture` polled after completion")
                }
            }
        }
    }
}

/// Checks the inner response before any of its body is consumed.
///
/// Bodyless statuses, bodies that are already encoded or partial, media that
/// does not compress and streams that must not be held back all pass through.
fn is_compressible(parts: &Parts) -> bool {
    let status = parts.status;
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return false;
    }

    let headers = &parts.headers;
    !headers.contains_key(header::CONTENT_ENCODING)
        && !headers.contains_key(header::CONTENT_RANGE)
        && !is_incompressible_media(headers)
        && !is_unbuffered_stream(headers)
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Images other than SVG and gRPC other than grpc-web.
fn is_incompressible_media(headers: &HeaderMap) -> bool {
    let content_type = content_type(headers);
    if content_type.starts_with("image/") {
        return !content_type.starts_with("image/svg+xml");
    }
    content_type.starts_with("application/grpc") && !content_type.starts_with("application/grpc-web")
}

/// Responses that are delivered as they are produced. The whole body is
/// collected before a compressed response is returned, so these would never
/// resolve when the stream does not end.
fn is_unbuffered_stream(headers: &HeaderMap) -> bool {
    let content_type = content_type(headers);
    content_type.starts_with("text/event-stream")
        || content_type.starts_with("application/grpc-web")
        || headers
            .get("x-accel-buffering")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("no"))
}

fn write_buf<D: Buf>(writer: &mut impl Write, mut data: D) -> io::Result<()> {
    while data.has_remaining() {
        let chunk = data.chunk();
        writer.write_all(chunk)?;
        let len = chunk.len();
        data.advance(len);
    }
    Ok(())
}

/// Closes the writer and rebuilds the response from the finished sink.
fn finish<B>(
    mut parts: Parts,
    writer: GzipResponseWriter<BufferedResponse>,
    trailers: Option<HeaderMap>,
) -> Result<Response<GzipBody<B>>, BoxError> {
    let (status, headers, body) = writer.finish()?.into_parts();
    tracing::trace!(status = %status, len = body.len(), "finished compressed response");
    parts.status = status;
    parts.headers = headers;
    Ok(Response::from_parts(parts, GzipBody::buffered(body, trailers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(status: StatusCode, headers: &[(&'static str, &'static str)]) -> Parts {
        let mut builder = Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_plain_response_compressible() {
        assert!(is_compressible(&parts(StatusCode::OK, &[])));
        assert!(is_compressible(&parts(
            StatusCode::NOT_FOUND,
            &[("content-type", "text/html; charset=utf-8")]
        )));
        assert!(is_compressible(&parts(
            StatusCode::OK,
            &[("content-type", "image/svg+xml")]
        )));
        assert!(is_compressible(&parts(
            StatusCode::OK,
            &[("x-accel-buffering", "yes")]
        )));
    }

    #[test]
    fn test_bodyless_status_not_compressible() {
        for status in [
            StatusCode::CONTINUE,
            StatusCode::SWITCHING_PROTOCOLS,
            StatusCode::NO_CONTENT,
            StatusCode::NOT_MODIFIED,
        ] {
            assert!(!is_compressible(&parts(status, &[])), "{status}");
        }
    }

    #[test]
    fn test_encoded_or_partial_not_compressible() {
        assert!(!is_compressible(&parts(
            StatusCode::OK,
            &[("content-encoding", "br")]
        )));
        assert!(!is_compressible(&parts(
            StatusCode::PARTIAL_CONTENT,
            &[("content-range", "bytes 0-99/200")]
        )));
    }

    #[test]
    fn test_media_not_compressible() {
        for content_type in ["image/png", "image/webp", "application/grpc", "application/grpc+proto"] {
            assert!(
                !is_compressible(&parts(StatusCode::OK, &[("content-type", content_type)])),
                "{content_type}"
            );
        }
    }

    #[test]
    fn test_streams_not_compressible() {
        for content_type in [
            "text/event-stream",
            "text/event-stream; charset=utf-8",
            "application/grpc-web",
            "application/grpc-web+proto",
        ] {
            assert!(
                !is_compressible(&parts(StatusCode::OK, &[("content-type", content_type)])),
                "{content_type}"
            );
        }
        assert!(!is_compressible(&parts(
            StatusCode::OK,
            &[("x-accel-buffering", "NO")]
        )));
    }
}
