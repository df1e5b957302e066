//! ZIP archive parsing and entry streaming.
//!
//! This module provides functionality for reading ZIP archives,
//! supporting both standard ZIP format and ZIP64 extensions for large archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`strings`]: Filename/comment decoding (UTF-8 or CP437) and filename validation
//! - [`ZipArchive`]: Locates the Central Directory and decodes entries one by one
//! - [`Entry`]: Immutable metadata for one archive member
//! - `stream`: Builds the read stream for an entry's data
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for archives > 4GB or with more than 65534 entries
//! - STORED (no compression) and DEFLATE compression methods
//! - Info-ZIP Unicode Path extra field
//! - Encrypted entries through a caller-supplied [`Decryptor`]
//!
//! ## Limitations
//!
//! - No multi-disk archive support
//! - No strong encryption
//! - No BZIP2, LZMA, or other compression methods

mod archive;
mod entry;
mod options;
mod stream;
pub mod strings;
pub mod structures;

pub use archive::ZipArchive;
pub use entry::{DosDateTime, Entry, ExtraField};
pub use options::{OpenOptions, ReadStreamOptions};
pub use stream::{Decryptor, InflateReader};
pub use strings::ZipString;
pub use structures::CompressionMethod;
