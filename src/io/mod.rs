//! Random access byte sources.
//!
//! The ZIP layer only ever talks to a [`RandomAccessReader`]; swapping a local
//! file for an in-memory buffer or a remote HTTP object needs no change above
//! this module.

#[cfg(feature = "http")]
mod http;
mod local;
mod memory;

#[cfg(feature = "http")]
pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::BufferReader;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::{Result, ZipError};

/// A finite, non-restartable stream of bytes.
pub type ReadStream = Pin<Box<dyn AsyncRead + Send>>;

/// Chunk size used by the default [`RandomAccessReader::create_read_stream`].
const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Trait for random access reading from a data source
///
/// Implementations must tolerate concurrent outstanding reads: several entry
/// streams may be reading from the same source at once.
#[async_trait]
pub trait RandomAccessReader: Send + Sync + 'static {
    /// Read data at the specified offset into the buffer.
    ///
    /// May return fewer bytes than requested; returning 0 for a non-empty
    /// buffer means the source ended early.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Read exactly `length` bytes starting at `offset`.
    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        check_range(offset, length as u64, self.size())?;

        let mut buf = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended after {filled} of {length} bytes at offset {offset}"),
                )
                .into());
            }
            filled += n;
        }
        Ok(buf)
    }

    /// Open a lazy stream over `length` bytes starting at `offset`.
    ///
    /// The default implementation issues chunked [`read`](Self::read) calls as
    /// the stream is polled.
    fn create_read_stream(self: Arc<Self>, offset: u64, length: u64) -> Result<ReadStream> {
        check_range(offset, length, self.size())?;
        Ok(chunked_read_stream(self, offset, length))
    }

    /// Release the underlying resource.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Fail with [`ZipError::OutOfBounds`] unless `offset..offset + length` lies within `size`.
pub(crate) fn check_range(offset: u64, length: u64, size: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ZipError::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}

/// Stream `length` bytes from `reader` in fixed-size chunks.
pub fn chunked_read_stream<R>(reader: Arc<R>, offset: u64, length: u64) -> ReadStream
where
    R: RandomAccessReader + ?Sized,
{
    let end = offset + length;
    let chunks = futures::stream::try_unfold((reader, offset), move |(reader, pos)| async move {
        if pos >= end {
            return Ok(None);
        }
        let len = (end - pos).min(READ_CHUNK_SIZE) as usize;
        let chunk = reader.read(pos, len).await.map_err(io::Error::from)?;
        Ok::<_, io::Error>(Some((Bytes::from(chunk), (reader, pos + len as u64))))
    });
    Box::pin(StreamReader::new(Box::pin(chunks)))
}
