//! On-disk ZIP records.
//!
//! All integers are little-endian. Each record type knows its signature and
//! fixed size and parses itself from a byte slice, verifying the signature.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, ZipError};

/// Sentinel used in 16-bit count fields when the real value lives in ZIP64 records.
pub const ZIP64_SENTINEL_U16: u16 = 0xFFFF;
/// Sentinel used in 32-bit size/offset fields when the real value lives in ZIP64 records.
pub const ZIP64_SENTINEL_U32: u32 = 0xFFFF_FFFF;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
pub const MAX_COMMENT_SIZE: u64 = 0xFFFF;

/// General purpose flag: traditional (ZipCrypto) encryption.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: sizes and CRC follow the data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: strong encryption.
pub const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;
/// General purpose flag: filename and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Extra field id: ZIP64 Extended Information.
pub const EXTRA_ZIP64: u16 = 0x0001;
/// Extra field id: Info-ZIP Unicode Path.
pub const EXTRA_UNICODE_PATH: u16 = 0x7075;

/// Length of the traditional encryption header that prefixes encrypted data.
pub const ENCRYPTION_HEADER_SIZE: u64 = 12;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

fn check_record(data: &[u8], signature: &[u8], size: usize, what: &str) -> Result<()> {
    if data.len() < size || &data[0..4] != signature {
        return Err(ZipError::format(format!("Invalid {what} signature")));
    }
    Ok(())
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_record(
            data,
            Self::SIGNATURE,
            Self::SIZE,
            "End of Central Directory Record",
        )?;

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Whether any of the count/size/offset fields defers to the ZIP64 record.
    pub fn is_zip64(&self) -> bool {
        self.total_entries == ZIP64_SENTINEL_U16
            || self.cd_size == ZIP64_SENTINEL_U32
            || self.cd_offset == ZIP64_SENTINEL_U32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_record(
            data,
            Self::SIGNATURE,
            Self::SIZE,
            "ZIP64 End of Central Directory Locator",
        )?;

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    /// Size of the record, not counting the leading 12 bytes.
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_record(
            data,
            Self::SIGNATURE,
            Self::MIN_SIZE,
            "ZIP64 End of Central Directory Record",
        )?;

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Fixed part of a Central Directory File Header (CDFH) - 46 bytes
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const SIZE: usize = 46;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_record(
            data,
            Self::SIGNATURE,
            Self::SIZE,
            "Central Directory File Header",
        )?;

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
            file_comment_length: cursor.read_u16::<LittleEndian>()?,
            disk_number_start: cursor.read_u16::<LittleEndian>()?,
            internal_attrs: cursor.read_u16::<LittleEndian>()?,
            external_attrs: cursor.read_u32::<LittleEndian>()?,
            lfh_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Combined length of the filename, extra field and comment that follow the header.
    pub fn variable_len(&self) -> usize {
        self.file_name_length as usize
            + self.extra_field_length as usize
            + self.file_comment_length as usize
    }
}

/// Fixed part of a Local File Header (LFH) - 30 bytes
///
/// Only the variable field lengths matter when locating file data; everything
/// else is taken from the Central Directory copy.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_record(data, Self::SIGNATURE, Self::SIZE, "Local File Header")?;

        // Offset to filename length field
        let mut cursor = Cursor::new(&data[26..]);

        Ok(Self {
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Bytes between the start of the header and the start of file data.
    pub fn total_len(&self) -> u64 {
        Self::SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32) -> Vec<u8> {
        let mut buf = b"PK\x05\x06".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf
    }

    #[test]
    fn eocd_fields_and_zip64_sentinels() {
        let record = EndOfCentralDirectory::from_bytes(&eocd(3, 150, 1000)).unwrap();
        assert_eq!(record.total_entries, 3);
        assert_eq!(record.cd_size, 150);
        assert_eq!(record.cd_offset, 1000);
        assert!(!record.is_zip64());

        for bytes in [
            eocd(0xFFFF, 150, 1000),
            eocd(3, 0xFFFF_FFFF, 1000),
            eocd(3, 150, 0xFFFF_FFFF),
        ] {
            assert!(EndOfCentralDirectory::from_bytes(&bytes).unwrap().is_zip64());
        }
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let mut bytes = eocd(1, 2, 3);
        bytes[3] = 0x07;
        assert!(matches!(
            EndOfCentralDirectory::from_bytes(&bytes),
            Err(ZipError::Format(_))
        ));
        assert!(LocalFileHeader::from_bytes(b"PK\x03\x04").is_err());
    }

    #[test]
    fn local_header_data_offset() {
        let mut lfh = vec![0u8; LocalFileHeader::SIZE];
        lfh[..4].copy_from_slice(LocalFileHeader::SIGNATURE);
        lfh[26..28].copy_from_slice(&10u16.to_le_bytes());
        lfh[28..30].copy_from_slice(&28u16.to_le_bytes());
        let header = LocalFileHeader::from_bytes(&lfh).unwrap();
        assert_eq!(header.total_len(), 68);
    }

    #[test]
    fn compression_method_codes() {
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_u16(93).as_u16(), 93);
    }
}
