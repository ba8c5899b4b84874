//! Gzip (RFC 1952) encoding and ratio-guarded decoding.
//!
//! # Responsibilities
//! - Stream-compress a source into a standalone gzip member
//! - Stream-decompress a gzip member while enforcing a decompression ratio
//! - In-memory variants for the buffered path
//!
//! # Design Decisions
//! - The 10-byte header is written by hand (no mtime, no name, OS unknown)
//!   so output is byte-identical for identical input; the body is raw
//!   deflate and the trailer is CRC32 plus length, little-endian
//! - Compressed input is fed to the decoder in small steps and the ratio is
//!   checked before every write, so a bomb is stopped with at most one
//!   step's worth of output in memory

use std::io::{self, Write};

use flate2::write::{DeflateEncoder, GzDecoder};
use flate2::{Compression, Crc};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed gzip member header: magic, deflate, no flags, mtime 0, xfl 0, OS 255.
pub const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0x00, 0xff];

/// Read size for streaming in either direction.
const STREAM_BUF_SIZE: usize = 16 * 1024;

/// Compressed bytes handed to the decoder per step.
const INFLATE_STEP: usize = 512;

/// Errors from the gzip codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decompression ratio exceeded: {bytes_out} bytes out of {bytes_in} bytes in")]
    RatioExceeded { bytes_in: u64, bytes_out: u64 },
    #[error("corrupt gzip data: {0}")]
    Data(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Byte counts of one codec run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Decompression ratio limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioGuard {
    /// Output/input ceiling in percent. 0 disables the guard.
    pub ratio_cap: u64,
    /// Output produced before the ceiling is enforced.
    pub min_eval: u64,
}

impl RatioGuard {
    pub fn new(ratio_cap: u64, min_eval: u64) -> Self {
        Self { ratio_cap, min_eval }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn exceeded(&self, bytes_in: u64, bytes_out: u64) -> bool {
        if self.ratio_cap == 0 || bytes_out < self.min_eval {
            return false;
        }
        u128::from(bytes_out) * 100 > u128::from(bytes_in) * u128::from(self.ratio_cap)
    }
}

/// Incremental gzip member writer.
pub struct GzipEncoder {
    deflate: DeflateEncoder<Vec<u8>>,
    crc: Crc,
}

impl GzipEncoder {
    pub fn new(level: u32) -> Self {
        let mut out = Vec::with_capacity(STREAM_BUF_SIZE);
        out.extend_from_slice(&GZIP_HEADER);
        Self {
            deflate: DeflateEncoder::new(out, Compression::new(level.min(9))),
            crc: Crc::new(),
        }
    }

    /// Feed input; returns whatever compressed output is ready.
    pub fn encode(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        self.crc.update(input);
        self.deflate.write_all(input)?;
        Ok(std::mem::take(self.deflate.get_mut()))
    }

    /// Flush the deflate stream and append the trailer.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        let mut out = self.deflate.finish()?;
        out.extend_from_slice(&self.crc.sum().to_le_bytes());
        out.extend_from_slice(&self.crc.amount().to_le_bytes());
        Ok(out)
    }
}

/// Step-wise gzip member reader with the ratio guard applied.
struct Inflater {
    decoder: GzDecoder<Vec<u8>>,
    guard: RatioGuard,
    stats: CodecStats,
    ended: bool,
}

impl Inflater {
    fn new(guard: RatioGuard) -> Self {
        Self {
            decoder: GzDecoder::new(Vec::new()),
            guard,
            stats: CodecStats::default(),
            ended: false,
        }
    }

    /// Decode at most one step of `input`. Returns the bytes consumed and
    /// the output they produced; the output is withheld when it would
    /// break the ratio.
    fn step(&mut self, input: &[u8]) -> Result<(usize, Vec<u8>), CodecError> {
        let slice = &input[..input.len().min(INFLATE_STEP)];
        let consumed = self.decoder.write(slice).map_err(CodecError::Data)?;
        if consumed == 0 && !slice.is_empty() {
            // Member complete, anything after it is ignored.
            self.ended = true;
        }
        self.stats.bytes_in += consumed as u64;
        let output = std::mem::take(self.decoder.get_mut());
        self.admit(&output)?;
        Ok((consumed, output))
    }

    fn finish(&mut self) -> Result<Vec<u8>, CodecError> {
        self.decoder.try_finish().map_err(CodecError::Data)?;
        let output = std::mem::take(self.decoder.get_mut());
        self.admit(&output)?;
        Ok(output)
    }

    fn admit(&mut self, output: &[u8]) -> Result<(), CodecError> {
        let bytes_out = self.stats.bytes_out + output.len() as u64;
        if self.guard.exceeded(self.stats.bytes_in, bytes_out) {
            return Err(CodecError::RatioExceeded {
                bytes_in: self.stats.bytes_in,
                bytes_out,
            });
        }
        self.stats.bytes_out = bytes_out;
        Ok(())
    }
}

/// Compress `source` until EOF into a gzip member written to `dest`.
///
/// `bytes_in` counts plain bytes read, `bytes_out` gzip bytes written.
pub async fn compress<R, W>(source: &mut R, dest: &mut W, level: u32) -> Result<CodecStats, CodecError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut encoder = GzipEncoder::new(level);
    let mut stats = CodecStats::default();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stats.bytes_in += n as u64;
        let out = encoder.encode(&buf[..n])?;
        if !out.is_empty() {
            dest.write_all(&out).await?;
            stats.bytes_out += out.len() as u64;
        }
    }

    let tail = encoder.finish()?;
    dest.write_all(&tail).await?;
    dest.flush().await?;
    stats.bytes_out += tail.len() as u64;
    Ok(stats)
}

/// Decompress one gzip member from `source` into `dest`.
///
/// Once `min_eval` bytes have been produced, output is refused as soon as
/// `bytes_out * 100 > bytes_in * ratio_cap`. `ratio_cap == 0` disables the
/// check. Bytes after the end of the member are not consumed from the
/// decoder's point of view and are ignored.
pub async fn decompress<R, W>(
    source: &mut R,
    dest: &mut W,
    ratio_cap: u64,
    min_eval: u64,
) -> Result<CodecStats, CodecError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut inflater = Inflater::new(RatioGuard::new(ratio_cap, min_eval));
    let mut buf = vec![0u8; STREAM_BUF_SIZE];

    'read: while !inflater.ended {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let mut pending = &buf[..n];
        while !pending.is_empty() {
            let (consumed, output) = inflater.step(pending)?;
            if !output.is_empty() {
                dest.write_all(&output).await?;
            }
            if inflater.ended {
                break 'read;
            }
            pending = &pending[consumed..];
        }
    }

    let tail = inflater.finish()?;
    if !tail.is_empty() {
        dest.write_all(&tail).await?;
    }
    dest.flush().await?;
    Ok(inflater.stats)
}

/// Gzip a resident buffer.
pub fn gzip_in_memory(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::new(level);
    let mut out = encoder.encode(data)?;
    out.extend(encoder.finish()?);
    Ok(out)
}

/// Gunzip a resident buffer, enforcing `ratio_cap` from the first byte.
pub fn gunzip_in_memory(data: &[u8], ratio_cap: u64) -> Result<Vec<u8>, CodecError> {
    let mut inflater = Inflater::new(RatioGuard::new(ratio_cap, 0));
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    let mut pending = data;
    while !pending.is_empty() && !inflater.ended {
        let (consumed, output) = inflater.step(pending)?;
        out.extend_from_slice(&output);
        pending = &pending[consumed..];
    }
    out.extend(inflater.finish()?);
    Ok(out)
}
