use crate::error::Error;
use crate::handler::GzipHandler;
use crate::options::GzipOptions;
use crate::service::GzipService;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that gzip-compresses HTTP response bodies.
///
/// All services produced by one layer share a single [`GzipHandler`], so
/// encoders and buffers are pooled across every request the layer serves.
///
/// # Example
///
/// ```
/// use http_response_gzip::{BEST_SPEED, GzipLayer, GzipOptions};
///
/// let layer = GzipLayer::with_options(
///     BEST_SPEED,
///     GzipOptions::new().compression_size_threshold(860),
/// )
/// .unwrap();
/// # let _: GzipLayer = layer;
/// ```
pub struct GzipLayer<B = Bytes> {
    handler: Arc<GzipHandler<B>>,
}

impl<B> GzipLayer<B> {
    /// Creates a layer compressing at `level` with the default options.
    pub fn new(level: i32) -> Result<Self, Error> {
        Self::with_options(level, GzipOptions::new())
    }

    /// Creates a layer compressing at `level` with `options`.
    pub fn with_options(level: i32, options: GzipOptions<B>) -> Result<Self, Error> {
        Ok(Self {
            handler: Arc::new(GzipHandler::new(level, options)?),
        })
    }

    /// Returns the shared handler.
    pub fn handler(&self) -> &GzipHandler<B> {
        &self.handler
    }
}

impl<B> Clone for GzipLayer<B> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<B> fmt::Debug for GzipLayer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipLayer")
            .field("handler", &self.handler)
            .finish()
    }
}

impl<S, B> Layer<S> for GzipLayer<B> {
    type Service = GzipService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        GzipService::new(inner, Arc::clone(&self.handler))
    }
}
