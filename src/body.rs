use bytes::{Buf, Bytes};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tower::BoxError;

pin_project! {
    /// A response body produced by [`GzipService`](crate::GzipService).
    ///
    /// Compressible responses are finished in memory and replayed from a
    /// single buffer; all others stream the inner body unchanged.
    #[project = GzipBodyProj]
    #[allow(missing_docs)]
    #[derive(Debug)]
    pub enum GzipBody<B> {
        /// The finished body, followed by the inner body's trailers.
        Buffered {
            data: Option<Bytes>,
            trailers: Option<HeaderMap>,
        },
        /// The inner body, untouched.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

impl<B> GzipBody<B> {
    /// Creates a body replaying `data`, followed by `trailers` if any.
    pub fn buffered(data: Bytes, trailers: Option<HeaderMap>) -> Self {
        Self::Buffered {
            data: Some(data).filter(|d| !d.is_empty()),
            trailers,
        }
    }

    /// Creates a body streaming `inner` as is.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

impl<B> Body for GzipBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            GzipBodyProj::Buffered { data, trailers } => {
                let frame = match data.take() {
                    Some(data) => Some(Frame::data(data)),
                    None => trailers.take().map(Frame::trailers),
                };
                Poll::Ready(frame.map(Ok))
            }
            GzipBodyProj::Passthrough { inner } => {
                let frame = match ready!(inner.poll_frame(cx)) {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return Poll::Ready(Some(Err(io::Error::other(e.into())))),
                    None => return Poll::Ready(None),
                };
                let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                Poll::Ready(Some(Ok(frame)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            GzipBody::Buffered { data, trailers } => data.is_none() && trailers.is_none(),
            GzipBody::Passthrough { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            GzipBody::Buffered { data, .. } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            GzipBody::Passthrough { inner } => inner.size_hint(),
        }
    }
}
