//! Gzip compression of HTTP response bodies, with pooled encoders and an
//! optional size threshold.
//!
//! The core is a synchronous interceptor, [`GzipHandler`], that swaps the
//! response writer of an eligible request for a compressing one and
//! finalizes it once the rest of the pipeline returns. [`GzipLayer`] puts
//! the same handler in front of any Tower service.
//!
//! # Example
//!
//! ```ignore
//! use http_response_gzip::{DEFAULT_COMPRESSION, GzipLayer, GzipOptions};
//! use tower::ServiceBuilder;
//!
//! let options = GzipOptions::new().compression_size_threshold(1024);
//! let service = ServiceBuilder::new()
//!     .layer(GzipLayer::with_options(DEFAULT_COMPRESSION, options)?)
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! A response is **not** compressed when:
//! - `Accept-Encoding` does not list `gzip`
//! - `Connection` asks for a protocol upgrade
//! - `Accept` contains `text/event-stream`
//! - The path has an excluded extension (by default `.png`, `.gif`, `.jpeg`, `.jpg`)
//! - The path is excluded exactly or matches an excluded pattern
//!
//! Behind [`GzipLayer`], the inner response is also passed through when:
//! - The request method is `HEAD`, or the status is 1xx, 204 or 304
//! - `Content-Encoding` or `Content-Range` is already set
//! - `Content-Type` starts with `image/` (except `image/svg+xml`) or
//!   `application/grpc` (except `application/grpc-web`)
//! - The response is a stream: `text/event-stream`, `application/grpc-web`,
//!   or `X-Accel-Buffering: no`
//!
//! With a non-zero threshold the body is held back until that many bytes
//! have been written; a body that ends before then is sent as is.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to `gzip`
//! - `Vary` header includes `Accept-Encoding`
//! - `Content-Length` header is set to the compressed size

#![deny(missing_docs)]

mod body;
mod codec;
mod error;
mod filter;
mod future;
mod handler;
mod layer;
mod options;
mod pool;
mod response;
mod service;
mod writer;

pub use body::GzipBody;
pub use codec::{
    BEST_COMPRESSION, BEST_SPEED, CompressionLevel, DEFAULT_COMPRESSION, GZIP_ENCODING,
    GzipEncoder, NO_COMPRESSION, accepts_gzip,
};
pub use error::Error;
pub use filter::should_compress;
pub use future::ResponseFuture;
pub use handler::{Compressor, GzipHandler};
pub use layer::GzipLayer;
pub use options::{
    DEFAULT_EXCLUDED_EXTENSIONS, DEFAULT_MAX_DECOMPRESSED_SIZE, DecompressFn, ExcludedExtensions,
    ExcludedPathRegexes, ExcludedPaths, GzipOptions, decompress_request,
    decompress_request_with_limit,
};
pub use pool::{Pool, Pooled, Recycle};
pub use response::{BufferedResponse, ResponseWriter};
pub use service::GzipService;
pub use writer::{GzipResponseWriter, GzipWriter, ThresholdWriter};
