use crate::error::Error;
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use std::fmt;
use std::io::{self, Write};

/// Stores the body without compressing it (still gzip framed).
pub const NO_COMPRESSION: i32 = 0;
/// Fastest compression.
pub const BEST_SPEED: i32 = 1;
/// Smallest output.
pub const BEST_COMPRESSION: i32 = 9;
/// The codec's default trade-off (level 6).
pub const DEFAULT_COMPRESSION: i32 = -1;

/// The Content-Encoding token announced for compressed responses.
pub const GZIP_ENCODING: &str = "gzip";

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;
const OS_UNKNOWN: u8 = 255;

/// A validated gzip compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(i32);

impl CompressionLevel {
    /// Validates a raw level.
    ///
    /// Accepts [`DEFAULT_COMPRESSION`] and the range
    /// [`NO_COMPRESSION`]..=[`BEST_COMPRESSION`].
    pub fn new(level: i32) -> Result<Self, Error> {
        if (DEFAULT_COMPRESSION..=BEST_COMPRESSION).contains(&level) {
            Ok(Self(level))
        } else {
            Err(Error::InvalidLevel(level))
        }
    }

    /// Returns the raw level.
    pub fn get(self) -> i32 {
        self.0
    }

    fn compression(self) -> Compression {
        match u32::try_from(self.0) {
            Ok(level) => Compression::new(level),
            Err(_) => Compression::default(),
        }
    }

    /// XFL byte of the gzip header.
    fn extra_flags(self) -> u8 {
        match self.0 {
            BEST_COMPRESSION => 2,
            BEST_SPEED => 4,
            _ => 0,
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(DEFAULT_COMPRESSION)
    }
}

#[derive(Clone, Copy)]
enum Flush {
    None,
    Sync,
    Finish,
}

impl Flush {
    fn mode(self) -> FlushCompress {
        match self {
            Flush::None => FlushCompress::None,
            Flush::Sync => FlushCompress::Sync,
            Flush::Finish => FlushCompress::Finish,
        }
    }
}

/// A reusable streaming gzip compressor.
///
/// The encoder never holds on to its output: every operation takes the sink
/// it should write to, so binding it to a response is a matter of which sink
/// the caller passes. [`reset`](Self::reset) returns it to a neutral state
/// ready for the next stream.
pub struct GzipEncoder {
    level: CompressionLevel,
    deflate: Compress,
    crc: Crc,
    header_written: bool,
    output: Vec<u8>,
}

impl GzipEncoder {
    /// Creates an encoder for the given level.
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            level,
            deflate: Compress::new(level.compression(), false),
            crc: Crc::new(),
            header_written: false,
            output: Vec::with_capacity(OUTPUT_BUFFER_SIZE),
        }
    }

    /// Returns the level this encoder was built with.
    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Returns the number of uncompressed bytes consumed by the current stream.
    pub fn total_in(&self) -> u64 {
        self.deflate.total_in()
    }

    /// Compresses `data` into `sink`, returning the number of input bytes consumed.
    pub fn write<W: Write + ?Sized>(&mut self, sink: &mut W, data: &[u8]) -> io::Result<usize> {
        self.write_header(sink)?;
        if data.is_empty() {
            return Ok(0);
        }
        self.crc.update(data);
        self.deflate(sink, data, Flush::None)?;
        Ok(data.len())
    }

    /// Emits everything compressed so far and flushes `sink`.
    pub fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.write_header(sink)?;
        self.deflate(sink, &[], Flush::Sync)?;
        sink.flush()
    }

    /// Ends the stream: writes the remaining compressed bytes and the gzip trailer.
    pub fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.write_header(sink)?;
        self.deflate(sink, &[], Flush::Finish)?;

        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&self.crc.sum().to_le_bytes());
        trailer[4..].copy_from_slice(&self.crc.amount().to_le_bytes());
        sink.write_all(&trailer)
    }

    /// Discards the current stream so the encoder can start a new one.
    pub fn reset(&mut self) {
        self.deflate.reset();
        self.crc.reset();
        self.header_written = false;
        self.output.clear();
    }

    fn write_header<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        let header = [
            GZIP_MAGIC[0],
            GZIP_MAGIC[1],
            METHOD_DEFLATE,
            0, // flags
            0,
            0,
            0,
            0, // mtime
            self.level.extra_flags(),
            OS_UNKNOWN,
        ];
        sink.write_all(&header)?;
        self.header_written = true;
        Ok(())
    }

    fn deflate<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        mut input: &[u8],
        flush: Flush,
    ) -> io::Result<()> {
        loop {
            self.output.clear();
            let before = self.deflate.total_in();
            let status = self
                .deflate
                .compress_vec(input, &mut self.output, flush.mode())
                .map_err(io::Error::other)?;
            let consumed = (self.deflate.total_in() - before) as usize;
            input = &input[consumed..];

            if !self.output.is_empty() {
                sink.write_all(&self.output)?;
            }

            let done = match flush {
                Flush::Finish => matches!(status, Status::StreamEnd),
                // A full output buffer means the compressor may still hold output.
                Flush::None | Flush::Sync => {
                    input.is_empty() && self.output.len() < self.output.capacity()
                }
            };
            if done {
                return Ok(());
            }
        }
    }
}

impl fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipEncoder")
            .field("level", &self.level)
            .field("total_in", &self.deflate.total_in())
            .field("header_written", &self.header_written)
            .finish()
    }
}

/// Returns whether an Accept-Encoding value accepts gzip.
///
/// The header value is expected to be comma-separated encodings with optional
/// quality values (e.g., "deflate, gzip;q=0.8"). A quality of zero rejects.
/// Only an explicit `gzip` or `x-gzip` token counts; the `*` wildcard does not.
pub fn accepts_gzip(header: &str) -> bool {
    header.split(',').any(|part| {
        let (encoding, quality) = parse_encoding_with_quality(part.trim());
        quality > 0.0
            && (encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip"))
    })
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let Some((encoding, params)) = s.split_once(';') else {
        return (s.trim(), 1.0);
    };
    let quality = params
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("q=").or_else(|| p.strip_prefix("Q=")))
        .map_or(Some(1.0), |q| q.trim().parse::<f32>().ok())
        .unwrap_or(0.0);
    (encoding.trim(), quality)
}
