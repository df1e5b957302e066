//! Options for opening archives and entry streams.

use std::fmt;
use std::sync::Arc;

use super::stream::Decryptor;

/// Options controlling how an archive's metadata is decoded.
#[derive(Clone)]
pub struct OpenOptions {
    /// Decode filenames and comments to text (CP437 or UTF-8). When off,
    /// [`ZipString::Raw`](super::ZipString::Raw) bytes are returned and
    /// filename validation is skipped.
    pub decode_strings: bool,
    /// Check stored entries' compressed size against their uncompressed size,
    /// and streamed byte counts against the declared size.
    pub validate_entry_sizes: bool,
    /// Reject absolute paths, `..` segments and NUL bytes in filenames.
    pub validate_filenames: bool,
    /// Keep backslashes in filenames (and reject them) instead of
    /// converting them to `/`.
    pub strict_filenames: bool,
    /// Cipher used when an encrypted entry is opened with `decrypt`.
    pub decryptor: Option<Arc<dyn Decryptor>>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            decode_strings: true,
            validate_entry_sizes: true,
            validate_filenames: true,
            strict_filenames: false,
            decryptor: None,
        }
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("decode_strings", &self.decode_strings)
            .field("validate_entry_sizes", &self.validate_entry_sizes)
            .field("validate_filenames", &self.validate_filenames)
            .field("strict_filenames", &self.strict_filenames)
            .field("decryptor", &self.decryptor.is_some())
            .finish()
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_strings(mut self, yes: bool) -> Self {
        self.decode_strings = yes;
        self
    }

    pub fn validate_entry_sizes(mut self, yes: bool) -> Self {
        self.validate_entry_sizes = yes;
        self
    }

    pub fn validate_filenames(mut self, yes: bool) -> Self {
        self.validate_filenames = yes;
        self
    }

    pub fn strict_filenames(mut self, yes: bool) -> Self {
        self.strict_filenames = yes;
        self
    }

    pub fn decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }
}

/// Options for [`ZipArchive::open_read_stream`](super::ZipArchive::open_read_stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// Inflate compressed entries. Ignored for stored entries.
    pub decompress: bool,
    /// Decrypt encrypted entries. Ignored for unencrypted entries.
    pub decrypt: bool,
    /// First raw byte to return, relative to the entry's data.
    pub start: Option<u64>,
    /// One past the last raw byte to return.
    pub end: Option<u64>,
    /// Check the CRC32 when the whole plaintext is streamed.
    pub validate_crc32: bool,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            decompress: true,
            decrypt: true,
            start: None,
            end: None,
            validate_crc32: true,
        }
    }
}

impl ReadStreamOptions {
    /// Options returning the entry's bytes exactly as stored in the archive.
    pub fn raw() -> Self {
        Self {
            decompress: false,
            decrypt: false,
            validate_crc32: false,
            ..Self::default()
        }
    }

    pub fn decompress(mut self, yes: bool) -> Self {
        self.decompress = yes;
        self
    }

    pub fn decrypt(mut self, yes: bool) -> Self {
        self.decrypt = yes;
        self
    }

    pub fn validate_crc32(mut self, yes: bool) -> Self {
        self.validate_crc32 = yes;
        self
    }

    /// Restrict the stream to raw bytes `start..end`.
    pub fn range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub(crate) fn has_range(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}
