//! Error types for ZIP archive reading.
//!
//! Every fallible operation returns [`Result<T>`], an alias for
//! `std::result::Result<T, ZipError>`. Errors raised while an entry stream is
//! being read surface as [`std::io::Error`] (that is what `AsyncRead` speaks);
//! converting such an error back with `ZipError::from` recovers the original
//! variant:
//!
//! ```no_run
//! use tokio::io::AsyncReadExt;
//! use ziprange::{ReadStreamOptions, ZipArchive, ZipError};
//!
//! # async fn demo() -> ziprange::Result<()> {
//! let zip = ZipArchive::open_path("archive.zip", Default::default()).await?;
//! if let Some(entry) = zip.read_entry().await? {
//!     let mut stream = zip.open_read_stream(&entry, ReadStreamOptions::default()).await?;
//!     let mut data = Vec::new();
//!     match stream.read_to_end(&mut data).await.map_err(ZipError::from) {
//!         Err(ZipError::Crc32Mismatch { .. }) => eprintln!("corrupted entry"),
//!         other => {
//!             other?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Coarse classification of a [`ZipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or missing archive structures.
    Format,
    /// Valid ZIP feature this crate does not handle.
    Unsupported,
    /// Stored sizes or checksums disagree with the data.
    SizeMismatch,
    /// Overlapping `read_entry` calls.
    Reentrancy,
    /// Failure reported by the byte source.
    Io,
    /// The caller passed something that cannot be honoured.
    Usage,
}

/// All failure modes of the reader.
#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("read of {length} bytes at offset {offset} exceeds source size {size}")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    #[error("End of Central Directory Record not found")]
    EocdrNotFound,

    #[error("{0}")]
    Format(String),

    #[error("invalid filename {filename:?}: {reason}")]
    InvalidFilename {
        filename: String,
        reason: &'static str,
    },

    #[error("Multi-disk ZIP files are not supported")]
    MultiDisk,

    #[error("Strong encryption is not supported")]
    StrongEncryption,

    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("entry is encrypted and no decryptor is configured")]
    DecryptionUnavailable,

    #[error("Compressed/uncompressed size mismatch for stored file: {compressed} !== {expected}")]
    StoredSizeMismatch { compressed: u64, expected: u64 },

    #[error("CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Crc32Mismatch { expected: u32, actual: u32 },

    #[error("entry size mismatch: expected {expected} bytes, got {actual}")]
    EntrySizeMismatch { expected: u64, actual: u64 },

    #[error("Cannot call `read_entry()` before previous call has completed")]
    Reentrancy,

    #[error("entry does not belong to this archive")]
    ForeignEntry,

    #[error("archive is closed")]
    Closed,

    #[error("invalid read stream options: {0}")]
    InvalidOptions(&'static str),
}

impl ZipError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ZipError::Format(msg.into())
    }

    /// Which part of the error taxonomy this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ZipError::Io(_) | ZipError::OutOfBounds { .. } => ErrorCategory::Io,
            ZipError::EocdrNotFound | ZipError::Format(_) | ZipError::InvalidFilename { .. } => {
                ErrorCategory::Format
            }
            ZipError::MultiDisk
            | ZipError::StrongEncryption
            | ZipError::UnsupportedCompression(_)
            | ZipError::DecryptionUnavailable => ErrorCategory::Unsupported,
            ZipError::StoredSizeMismatch { .. }
            | ZipError::Crc32Mismatch { .. }
            | ZipError::EntrySizeMismatch { .. } => ErrorCategory::SizeMismatch,
            ZipError::Reentrancy => ErrorCategory::Reentrancy,
            ZipError::ForeignEntry | ZipError::Closed | ZipError::InvalidOptions(_) => {
                ErrorCategory::Usage
            }
        }
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        // Errors raised inside entry streams carry a ZipError payload.
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return ZipError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip_err)) => *zip_err,
            Some(Err(inner)) => ZipError::Io(io::Error::new(kind, inner)),
            None => ZipError::Io(io::Error::from(kind)),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
