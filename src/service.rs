use crate::body::GzipBody;
use crate::future::ResponseFuture;
use crate::handler::GzipHandler;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body::Body;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Service};

/// A Tower service that gzip-compresses the responses of eligible requests.
pub struct GzipService<S, B = Bytes> {
    inner: S,
    handler: Arc<GzipHandler<B>>,
}

impl<S, B> GzipService<S, B> {
    /// Creates a new service wrapping `inner` with a shared handler.
    pub fn new(inner: S, handler: Arc<GzipHandler<B>>) -> Self {
        Self { inner, handler }
    }

    /// Returns the handler deciding and performing compression.
    pub fn handler(&self) -> &GzipHandler<B> {
        &self.handler
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Clone, B> Clone for GzipService<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<S: fmt::Debug, B> fmt::Debug for GzipService<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipService")
            .field("inner", &self.inner)
            .field("handler", &self.handler)
            .finish()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GzipService<S, ReqBody>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<GzipBody<ResBody>>;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        self.handler.decompress(&mut req);

        // A HEAD response has no body to compress, and its headers must match
        // the ones a GET would carry before compression.
        if req.method() == Method::HEAD || !self.handler.should_compress(&req) {
            return ResponseFuture::passthrough(self.inner.call(req));
        }

        tracing::trace!(path = req.uri().path(), "compressing response");
        let compressor = self.handler.compressor().clone();
        ResponseFuture::compressed(self.inner.call(req), compressor)
    }
}
