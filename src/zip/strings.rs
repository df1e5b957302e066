//! Filename and comment decoding.
//!
//! ZIP text is UTF-8 when general purpose bit 11 is set and IBM code page 437
//! otherwise. With string decoding switched off, callers get the raw bytes.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Result, ZipError};

/// A filename or comment, decoded or left as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipString {
    Text(String),
    Raw(Vec<u8>),
}

impl ZipString {
    /// The decoded text, if decoding was enabled.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ZipString::Text(s) => Some(s),
            ZipString::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ZipString::Text(s) => s.as_bytes(),
            ZipString::Raw(b) => b,
        }
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        match self {
            ZipString::Text(s) => Cow::Borrowed(s),
            ZipString::Raw(b) => String::from_utf8_lossy(b),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn ends_with(&self, suffix: &str) -> bool {
        self.as_bytes().ends_with(suffix.as_bytes())
    }
}

impl fmt::Display for ZipString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl PartialEq<str> for ZipString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for ZipString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

/// Decode `bytes` as UTF-8 (lossy) or CP437.
pub fn decode_bytes(bytes: &[u8], is_utf8: bool) -> String {
    if is_utf8 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        decode_cp437(bytes)
    }
}

/// Either decode `bytes` or copy them verbatim, depending on `decode_strings`.
pub(crate) fn decode_field(bytes: &[u8], is_utf8: bool, decode_strings: bool) -> ZipString {
    if decode_strings {
        ZipString::Text(decode_bytes(bytes, is_utf8))
    } else {
        ZipString::Raw(bytes.to_vec())
    }
}

/// Upper half of code page 437; the lower half is ASCII.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// Decode a CP437 byte string.
pub fn decode_cp437(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                CP437_HIGH[(b - 0x80) as usize]
            }
        })
        .collect()
}

/// Reject filenames that could escape an extraction directory.
pub fn validate_filename(filename: &str) -> Result<()> {
    let reject = |reason| {
        Err(ZipError::InvalidFilename {
            filename: filename.to_string(),
            reason,
        })
    };

    if filename.contains('\0') {
        return reject("contains null bytes");
    }
    if filename.contains('\\') {
        return reject("invalid characters");
    }

    let bytes = filename.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if filename.starts_with('/') || has_drive {
        return reject("absolute path");
    }
    if filename.split('/').any(|segment| segment == "..") {
        return reject("invalid relative path");
    }

    Ok(())
}
