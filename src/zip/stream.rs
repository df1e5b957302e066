//! Entry read streams.
//!
//! Opening an entry reads its Local File Header to find where the data
//! really starts, then stacks readers over the raw byte range:
//!
//! ```text
//! range stream -> [decryptor] -> [InflateReader] -> [VerifyingReader]
//! ```
//!
//! Every stage owns its input, so dropping the outermost stream releases the
//! whole chain. The archive's [`RandomAccessReader`] is shared, never closed
//! here.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use flate2::{Decompress, FlushDecompress, Status};
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};

use super::entry::Entry;
use super::options::{OpenOptions, ReadStreamOptions};
use super::structures::{CompressionMethod, LocalFileHeader};
use crate::error::{Result, ZipError};
use crate::io::{RandomAccessReader, ReadStream};

/// External cipher for encrypted entries.
///
/// Receives the entry's raw bytes (including any encryption header) and
/// returns a stream of the decrypted, still possibly compressed, data.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, entry: &Entry, ciphertext: ReadStream) -> Result<ReadStream>;
}

/// How an entry's bytes will be transformed, resolved against the entry itself.
#[derive(Debug)]
struct Plan {
    decrypt: bool,
    decompress: bool,
    start: u64,
    end: u64,
    /// The stream yields the entry's full plaintext, so sizes and CRC can be checked.
    whole_plaintext: bool,
}

fn plan(entry: &Entry, options: &ReadStreamOptions, open_options: &OpenOptions) -> Result<Plan> {
    let decrypt = options.decrypt && entry.is_encrypted();
    let decompress = options.decompress && entry.is_compressed();

    if entry.is_encrypted() && !decrypt && decompress {
        return Err(ZipError::InvalidOptions(
            "cannot decompress an encrypted entry without decrypting it",
        ));
    }
    if options.has_range() && decompress {
        return Err(ZipError::InvalidOptions(
            "start/end range not allowed when decompressing a compressed entry",
        ));
    }
    if options.has_range() && decrypt {
        return Err(ZipError::InvalidOptions(
            "start/end range not allowed when decrypting an encrypted entry",
        ));
    }
    if decrypt && open_options.decryptor.is_none() {
        return Err(ZipError::DecryptionUnavailable);
    }
    if decompress && entry.compression() != CompressionMethod::Deflate {
        return Err(ZipError::UnsupportedCompression(entry.compression_method));
    }

    let size = entry.compressed_size;
    let start = options.start.unwrap_or(0);
    let end = options.end.unwrap_or(size);
    if start > end {
        return Err(ZipError::InvalidOptions("start must not be after end"));
    }

    let plaintext = !entry.is_encrypted() || decrypt;
    let inflated = !entry.is_compressed() || decompress;

    Ok(Plan {
        decrypt,
        decompress,
        start: start.min(size),
        end: end.min(size),
        whole_plaintext: !options.has_range() && plaintext && inflated,
    })
}

/// Build the read stream for `entry`. Ownership checks are the caller's job.
pub(crate) async fn open_entry_stream<R: RandomAccessReader>(
    reader: &Arc<R>,
    footer_offset: u64,
    entry: &Entry,
    options: &ReadStreamOptions,
    open_options: &OpenOptions,
) -> Result<ReadStream> {
    let plan = plan(entry, options, open_options)?;

    let lfh_buf = reader
        .read(entry.file_header_offset, LocalFileHeader::SIZE)
        .await?;
    let lfh = LocalFileHeader::from_bytes(&lfh_buf)?;

    let data_offset = entry.file_header_offset + lfh.total_len();
    let data_end = data_offset
        .checked_add(entry.compressed_size)
        .filter(|end| *end <= footer_offset)
        .ok_or_else(|| ZipError::format("File data overflows file bounds"))?;

    log::debug!(
        "opening {} ({} raw bytes at {data_offset}..{data_end}, decrypt={}, decompress={})",
        entry.filename,
        plan.end - plan.start,
        plan.decrypt,
        plan.decompress
    );

    let mut stream =
        reader
            .clone()
            .create_read_stream(data_offset + plan.start, plan.end - plan.start)?;

    if plan.decrypt {
        // `plan` guarantees a decryptor is present.
        if let Some(decryptor) = &open_options.decryptor {
            stream = decryptor.decrypt(entry, stream)?;
        }
    }

    if plan.decompress {
        stream = Box::pin(InflateReader::new(BufReader::new(stream)));
    }

    if plan.whole_plaintext && (options.validate_crc32 || open_options.validate_entry_sizes) {
        stream = Box::pin(VerifyingReader {
            inner: stream,
            hasher: options.validate_crc32.then(crc32fast::Hasher::new),
            expected_crc: entry.crc32,
            expected_size: open_options
                .validate_entry_sizes
                .then_some(entry.uncompressed_size),
            count: 0,
            finished: false,
        });
    }

    Ok(stream)
}

/// Streaming raw DEFLATE decoder.
pub struct InflateReader<R> {
    inner: R,
    decompress: Decompress,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> InflateReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decompress: Decompress::new(false),
            done: false,
        }
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for InflateReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.done || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let input = ready!(Pin::new(&mut this.inner).poll_fill_buf(cx))?;
            let eof = input.is_empty();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let before_in = this.decompress.total_in();
            let before_out = this.decompress.total_out();
            let status = this
                .decompress
                .decompress(input, buf.initialize_unfilled(), flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = (this.decompress.total_in() - before_in) as usize;
            let produced = (this.decompress.total_out() - before_out) as usize;

            Pin::new(&mut this.inner).consume(consumed);
            buf.advance(produced);

            if status == Status::StreamEnd {
                this.done = true;
                return Poll::Ready(Ok(()));
            }
            if produced > 0 {
                return Poll::Ready(Ok(()));
            }
            if eof {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream ended unexpectedly",
                )));
            }
            if consumed == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate decoder made no progress",
                )));
            }
        }
    }
}

/// Counts and checksums bytes as they pass, failing at end of stream on mismatch.
struct VerifyingReader {
    inner: ReadStream,
    hasher: Option<crc32fast::Hasher>,
    expected_crc: u32,
    expected_size: Option<u64>,
    count: u64,
    finished: bool,
}

impl VerifyingReader {
    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(expected) = self.expected_size {
            if self.count != expected {
                return Err(ZipError::EntrySizeMismatch {
                    expected,
                    actual: self.count,
                });
            }
        }
        if let Some(hasher) = self.hasher.take() {
            let actual = hasher.finalize();
            if actual != self.expected_crc {
                return Err(ZipError::Crc32Mismatch {
                    expected: self.expected_crc,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl AsyncRead for VerifyingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.finished || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(this.inner.as_mut().poll_read(cx, buf))?;
        let chunk = &buf.filled()[before..];

        if chunk.is_empty() {
            return Poll::Ready(this.finish().map_err(io::Error::from));
        }

        this.count += chunk.len() as u64;
        if let Some(hasher) = this.hasher.as_mut() {
            hasher.update(chunk);
        }
        if let Some(expected) = this.expected_size {
            if this.count > expected {
                this.finished = true;
                return Poll::Ready(Err(ZipError::EntrySizeMismatch {
                    expected,
                    actual: this.count,
                }
                .into()));
            }
        }
        Poll::Ready(Ok(()))
    }
}
