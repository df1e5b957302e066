//! # ziprange
//!
//! Async ZIP archive reader over random-access byte sources.
//!
//! The archive is never loaded as a whole: only the footer records, the
//! Central Directory headers that are actually requested and the data of the
//! entries being streamed are read. That makes it suitable for large local
//! files as well as remote archives fetched with HTTP Range requests.
//!
//! ## Features
//!
//! - Read ZIP files from the local filesystem, memory, or HTTP/HTTPS URLs
//! - Plug in any other byte source through [`RandomAccessReader`]
//! - Support for ZIP64 format (archives larger than 4GB or with many entries)
//! - Lazy, one-at-a-time Central Directory decoding
//! - Entry streams with raw byte ranges, DEFLATE decompression and CRC32 checks
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::io::AsyncReadExt;
//! use ziprange::{HttpRangeReader, OpenOptions, ReadStreamOptions, ZipArchive};
//!
//! #[tokio::main]
//! async fn main() -> ziprange::Result<()> {
//!     // Create a reader for a remote ZIP file
//!     let reader = Arc::new(HttpRangeReader::new("https://example.com/archive.zip").await?);
//!     let zip = ZipArchive::open(reader, OpenOptions::default()).await?;
//!
//!     // List all files in the archive and print the first one
//!     let entries = zip.read_entries(None).await?;
//!     for entry in &entries {
//!         println!("{}", entry.filename);
//!     }
//!     if let Some(first) = entries.iter().find(|e| !e.is_directory()) {
//!         let mut text = String::new();
//!         zip.open_read_stream(first, ReadStreamOptions::default())
//!             .await?
//!             .read_to_string(&mut text)
//!             .await?;
//!         println!("{text}");
//!     }
//!
//!     zip.close().await
//! }
//! ```

pub mod error;
pub mod io;
pub mod zip;

pub use error::{ErrorCategory, Result, ZipError};
#[cfg(feature = "http")]
pub use io::HttpRangeReader;
pub use io::{BufferReader, LocalFileReader, RandomAccessReader, ReadStream};
pub use zip::{
    CompressionMethod, Decryptor, DosDateTime, Entry, ExtraField, OpenOptions, ReadStreamOptions,
    ZipArchive, ZipString,
};
