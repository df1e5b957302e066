use super::strings::ZipString;
use super::structures::{CompressionMethod, FLAG_ENCRYPTED, FLAG_UTF8};

/// Host system codes (upper byte of "version made by") whose external
/// attributes carry a Unix mode in their upper 16 bits.
const HOST_UNIX: u8 = 3;
const HOST_OSX: u8 = 19;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// One extra field sub-record, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraField {
    pub id: u16,
    pub data: Vec<u8>,
}

/// MS-DOS timestamp, no timezone attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DosDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Metadata of one archive member, decoded from its Central Directory File Header.
///
/// Entries are plain values: they stay valid after the archive is closed, but
/// can only be opened for reading through the archive that produced them.
#[derive(Debug, Clone)]
pub struct Entry {
    pub filename: ZipString,
    pub comment: ZipString,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub crc32: u32,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    /// Offset of the Local File Header.
    pub file_header_offset: u64,
    /// Whether any size/offset field came from a ZIP64 extra field.
    pub is_zip64: bool,
    pub general_purpose_bit_flag: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub version_made_by: u16,
    pub version_needed_to_extract: u16,
    pub extra_fields: Vec<ExtraField>,
    pub(crate) archive_id: u64,
}

impl Entry {
    pub fn compression(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.compression_method)
    }

    pub fn is_encrypted(&self) -> bool {
        self.general_purpose_bit_flag & FLAG_ENCRYPTED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_method != 0
    }

    /// Whether filename and comment are flagged as UTF-8.
    pub fn is_utf8(&self) -> bool {
        self.general_purpose_bit_flag & FLAG_UTF8 != 0
    }

    /// Directory entries end with '/'
    pub fn is_directory(&self) -> bool {
        self.filename.ends_with("/")
    }

    /// Unix permission and file type bits, for archives made on a Unix-like host.
    pub fn unix_mode(&self) -> Option<u32> {
        let host = (self.version_made_by >> 8) as u8;
        matches!(host, HOST_UNIX | HOST_OSX).then_some(self.external_file_attributes >> 16)
    }

    pub fn is_symlink(&self) -> bool {
        self.unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    pub fn last_modified(&self) -> DosDateTime {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        DosDateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }
}
