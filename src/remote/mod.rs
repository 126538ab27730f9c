//! Random-access byte sources for remote archives.
//!
//! A [`ByteSource`] answers "give me `length` bytes at `offset`" against an
//! object whose total size is known up front. Everything above this layer
//! (ZIP parsing, entry decompression) only ever talks to that trait, so the
//! same archive code runs against S3, plain HTTP servers and in-memory
//! buffers.

pub mod http;
pub mod metrics;
pub mod s3;

pub use http::HttpSource;
pub use metrics::{MeteredSource, TransferMetrics};
pub use s3::{S3Client, S3Source};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use indicatif::ProgressBar;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::config::{MountConfig, RemoteLocation};

/// Size of the read-ahead chunk fetched when a reader runs out of buffered data
const READ_AHEAD: u64 = 64 * 1024;

/// A remote object that supports reads at arbitrary offsets.
pub trait ByteSource: Send + Sync {
    /// Total size of the object in bytes
    fn size(&self) -> u64;

    /// Read exactly `length` bytes starting at `offset`.
    /// The range must lie within `0..size()`.
    fn read_range(&self, offset: u64, length: u64) -> Result<Bytes>;

    /// Read the last `length` bytes of the object (clamped to its size)
    fn read_tail(&self, length: u64) -> Result<Bytes> {
        let actual_length = length.min(self.size());
        let offset = self.size() - actual_length;
        self.read_range(offset, actual_length)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        (**self).read_range(offset, length)
    }
}

/// Reject ranges that fall outside an object of `size` bytes
pub(crate) fn check_range(offset: u64, length: u64, size: u64) -> Result<()> {
    let end = offset
        .checked_add(length)
        .ok_or_else(|| anyhow!("Range overflow: {}+{}", offset, length))?;
    if end > size {
        return Err(anyhow!(
            "Range out of bounds: {}+{} > {}",
            offset,
            length,
            size
        ));
    }
    Ok(())
}

/// An object held entirely in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        MemorySource { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        check_range(offset, length, self.size())?;
        Ok(self
            .data
            .slice(offset as usize..(offset + length) as usize))
    }
}

/// Sequential `Read + Seek` view over a window of a [`ByteSource`].
///
/// Keeps one read-ahead chunk; seeking within it is free, anything else
/// triggers a new range request on the next read.
pub struct RangeReader<S> {
    source: S,
    /// Absolute offset of the window start
    start: u64,
    /// Window length
    len: u64,
    /// Position relative to `start`
    position: u64,
    buffer: Bytes,
    /// Position of `buffer[0]` relative to `start`
    buffer_offset: u64,
}

impl<S: ByteSource> RangeReader<S> {
    /// Reader over the whole object
    pub fn new(source: S) -> Self {
        let len = source.size();
        Self::window(source, 0, len)
    }

    /// Reader over `start..start + len` of the object
    pub fn window(source: S, start: u64, len: u64) -> Self {
        RangeReader {
            source,
            start,
            len,
            position: 0,
            buffer: Bytes::new(),
            buffer_offset: 0,
        }
    }

    fn buffered(&self) -> bool {
        self.position >= self.buffer_offset
            && self.position < self.buffer_offset + self.buffer.len() as u64
    }
}

impl<S: ByteSource> Read for RangeReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.len {
            return Ok(0);
        }

        if !self.buffered() {
            let remaining = self.len - self.position;
            let fetch_size = READ_AHEAD.max(buf.len() as u64).min(remaining);
            let bytes = self
                .source
                .read_range(self.start + self.position, fetch_size)
                .map_err(io::Error::other)?;
            if bytes.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Remote source returned no data",
                ));
            }
            self.buffer = bytes;
            self.buffer_offset = self.position;
        }

        let at = (self.position - self.buffer_offset) as usize;
        let to_copy = (self.buffer.len() - at).min(buf.len());
        buf[..to_copy].copy_from_slice(&self.buffer[at..at + to_copy]);
        self.position += to_copy as u64;
        Ok(to_copy)
    }
}

impl<S: ByteSource> Seek for RangeReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::End(offset) => {
                if offset >= 0 {
                    self.len + offset as u64
                } else {
                    self.len.saturating_sub(offset.unsigned_abs())
                }
            }
            SeekFrom::Current(offset) => {
                if offset >= 0 {
                    self.position + offset as u64
                } else {
                    self.position.saturating_sub(offset.unsigned_abs())
                }
            }
        };

        if new_pos > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek beyond end of file",
            ));
        }

        self.position = new_pos;
        Ok(new_pos)
    }
}

/// Open the byte source described by a mount configuration.
///
/// S3 objects go through the AWS SDK on `runtime`; HTTP(S) URLs use blocking
/// range requests. Every fetch is recorded in `metrics` and, while
/// `progress` is still running, reported on it.
pub fn open_source(
    config: &MountConfig,
    runtime: &tokio::runtime::Handle,
    metrics: Arc<TransferMetrics>,
    progress: Option<ProgressBar>,
) -> Result<Arc<dyn ByteSource>> {
    let source: Arc<dyn ByteSource> = match &config.location {
        RemoteLocation::S3 { bucket, key } => {
            let client = runtime.block_on(S3Client::new(config.provider.clone()))?;
            Arc::new(S3Source::new(
                Arc::new(client),
                bucket.clone(),
                key.clone(),
                runtime.clone(),
            )?)
        }
        RemoteLocation::Http { url } => Arc::new(HttpSource::new(url)?),
    };

    Ok(Arc::new(MeteredSource::new(source, metrics, progress)))
}
