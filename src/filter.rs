use crate::codec::accepts_gzip;
use crate::options::GzipOptions;
use http::{HeaderMap, Request, header};

/// Decides whether the response to `req` may be compressed.
///
/// Header checks run first: the client must accept gzip, and protocol
/// upgrades and event streams are never compressed. Then the path is checked
/// against the excluded extensions, exact paths and patterns.
pub fn should_compress<B>(req: &Request<B>, options: &GzipOptions<B>) -> bool {
    let headers = req.headers();
    if !accepts_gzip(header_str(headers, header::ACCEPT_ENCODING)) {
        return false;
    }
    if contains_ignore_ascii_case(header_str(headers, header::CONNECTION), "upgrade") {
        tracing::trace!("skipping compression for protocol upgrade");
        return false;
    }
    if header_str(headers, header::ACCEPT).contains("text/event-stream") {
        tracing::trace!("skipping compression for event stream");
        return false;
    }

    let path = req.uri().path();
    if options.excluded_extensions.contains(extension(path)) {
        tracing::trace!(path, "skipping compression for excluded extension");
        return false;
    }
    if options.excluded_paths.contains(path) {
        tracing::trace!(path, "skipping compression for excluded path");
        return false;
    }
    if options.excluded_path_regexes.is_match(path) {
        tracing::trace!(path, "skipping compression for excluded path pattern");
        return false;
    }

    true
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Returns the extension of the last path segment, dot included, or `""`.
fn extension(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) => &name[dot..],
        None => "",
    }
}
