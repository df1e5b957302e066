//! The archive coordinator.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Walk the Central Directory one header at a time as entries are requested
//! 4. For extraction, read each file's Local File Header and data
//!
//! Only the tail of the source and the headers actually requested are ever
//! read, which keeps remote (HTTP) archives cheap to inspect.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use byteorder::{ByteOrder, LittleEndian};
use futures::Stream;

use super::entry::{Entry, ExtraField};
use super::options::{OpenOptions, ReadStreamOptions};
use super::stream::open_entry_stream;
use super::strings::{ZipString, decode_bytes, decode_field, validate_filename};
use super::structures::*;
use crate::error::{Result, ZipError};
use crate::io::{BufferReader, LocalFileReader, RandomAccessReader, ReadStream};

static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// "Version made by" written by macOS Archive Utility: Unix host, spec 2.1.
const MAC_ARCHIVE_UTILITY_VERSION: u16 = 0x0315;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    Idle,
    Reading,
}

/// Position of the Central Directory walk.
#[derive(Debug)]
struct EntryCursor {
    phase: ReadPhase,
    entries_read: u64,
    offset: u64,
    /// Every entry read so far looks like macOS Archive Utility output.
    maybe_mac: bool,
}

/// Marks the cursor busy for the lifetime of one `read_entry` call,
/// including when that call's future is dropped half way.
struct ReadGuard<'a> {
    cursor: &'a Mutex<EntryCursor>,
}

impl<'a> ReadGuard<'a> {
    fn acquire(cursor: &'a Mutex<EntryCursor>) -> Result<Self> {
        let mut state = cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if state.phase == ReadPhase::Reading {
            return Err(ZipError::Reentrancy);
        }
        state.phase = ReadPhase::Reading;
        Ok(Self { cursor })
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = ReadPhase::Idle;
    }
}

/// Values taken from the EOCDR (and ZIP64 records) while opening.
#[derive(Debug)]
struct Footer {
    is_zip64: bool,
    entry_count: u64,
    footer_offset: u64,
    central_directory_offset: u64,
    central_directory_size: u64,
    comment: ZipString,
}

/// A ZIP archive opened over a [`RandomAccessReader`].
///
/// Entries are decoded lazily, one Central Directory header per
/// [`read_entry`](Self::read_entry) call. Any number of entry streams can be
/// open at once; close the archive only after they are done.
///
/// ## Example
///
/// ```no_run
/// use tokio::io::AsyncReadExt;
/// use ziprange::{OpenOptions, ReadStreamOptions, ZipArchive};
///
/// # async fn demo() -> ziprange::Result<()> {
/// let zip = ZipArchive::open_path("archive.zip", OpenOptions::default()).await?;
/// while let Some(entry) = zip.read_entry().await? {
///     if entry.is_directory() {
///         continue;
///     }
///     let mut data = Vec::new();
///     zip.open_read_stream(&entry, ReadStreamOptions::default())
///         .await?
///         .read_to_end(&mut data)
///         .await?;
///     println!("{}: {} bytes", entry.filename, data.len());
/// }
/// zip.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ZipArchive<R: RandomAccessReader> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
    id: u64,
    options: OpenOptions,
    is_zip64: bool,
    entry_count: u64,
    footer_offset: u64,
    central_directory_offset: u64,
    central_directory_size: u64,
    comment: ZipString,
    cursor: Mutex<EntryCursor>,
    closed: AtomicBool,
}

impl ZipArchive<LocalFileReader> {
    /// Open a ZIP file on the local filesystem.
    pub async fn open_path(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let reader = LocalFileReader::new(path)?;
        Self::open(Arc::new(reader), options).await
    }
}

impl ZipArchive<BufferReader> {
    /// Open a ZIP archive held in memory.
    pub async fn from_buffer(data: impl Into<bytes::Bytes>, options: OpenOptions) -> Result<Self> {
        Self::open(Arc::new(BufferReader::new(data)), options).await
    }
}

#[cfg(feature = "http")]
impl ZipArchive<crate::io::HttpRangeReader> {
    /// Open a remote ZIP file through HTTP Range requests.
    pub async fn open_url(url: impl Into<String>, options: OpenOptions) -> Result<Self> {
        let reader = crate::io::HttpRangeReader::new(url).await?;
        Self::open(Arc::new(reader), options).await
    }
}

impl<R: RandomAccessReader> ZipArchive<R> {
    /// Open an archive over `reader`, locating its Central Directory.
    ///
    /// On failure the reader is left open; it is only closed by
    /// [`close`](Self::close) on a successfully opened archive.
    pub async fn open(reader: Arc<R>, options: OpenOptions) -> Result<Self> {
        let size = reader.size();
        let footer = read_footer(reader.as_ref(), size, &options).await?;

        log::debug!(
            "central directory: {} entries, {} bytes at offset {} (zip64: {})",
            footer.entry_count,
            footer.central_directory_size,
            footer.central_directory_offset,
            footer.is_zip64
        );

        let maybe_mac = !footer.is_zip64 && footer.comment.is_empty();
        Ok(Self {
            reader,
            size,
            id: NEXT_ARCHIVE_ID.fetch_add(1, Ordering::Relaxed),
            options,
            is_zip64: footer.is_zip64,
            entry_count: footer.entry_count,
            footer_offset: footer.footer_offset,
            central_directory_offset: footer.central_directory_offset,
            central_directory_size: footer.central_directory_size,
            comment: footer.comment,
            cursor: Mutex::new(EntryCursor {
                phase: ReadPhase::Idle,
                entries_read: 0,
                offset: footer.central_directory_offset,
                maybe_mac,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Total size of the archive in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_zip64(&self) -> bool {
        self.is_zip64
    }

    /// Number of entries declared by the Central Directory footers.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Start of the first footer record; no entry data may extend past it.
    pub fn footer_offset(&self) -> u64 {
        self.footer_offset
    }

    pub fn central_directory_offset(&self) -> u64 {
        self.central_directory_offset
    }

    pub fn central_directory_size(&self) -> u64 {
        self.central_directory_size
    }

    /// Archive comment (always CP437 when decoded).
    pub fn comment(&self) -> &ZipString {
        &self.comment
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Number of entries returned by [`read_entry`](Self::read_entry) so far.
    pub fn entries_read(&self) -> u64 {
        self.lock_cursor().entries_read
    }

    /// Whether the archive may have been written by macOS Archive Utility.
    ///
    /// Starts out from the footer (no ZIP64 records, no comment) and is
    /// narrowed by every entry read; it only means something once all
    /// entries have been read. Sizes are never corrected on its account.
    pub fn is_maybe_mac_archive(&self) -> bool {
        self.lock_cursor().maybe_mac
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Close the archive and its reader.
    ///
    /// Streams opened earlier are not cancelled.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.reader.close().await
    }

    fn lock_cursor(&self) -> std::sync::MutexGuard<'_, EntryCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode the next Central Directory entry.
    ///
    /// Returns `Ok(None)` once every declared entry has been read. Calling
    /// this again while a previous call is still pending fails with
    /// [`ZipError::Reentrancy`].
    pub async fn read_entry(&self) -> Result<Option<Entry>> {
        let _guard = ReadGuard::acquire(&self.cursor)?;
        if !self.is_open() {
            return Err(ZipError::Closed);
        }

        let (entries_read, offset) = {
            let cursor = self.lock_cursor();
            (cursor.entries_read, cursor.offset)
        };
        if entries_read == self.entry_count {
            return Ok(None);
        }

        let (entry, next_offset) = self.decode_entry(offset).await?;

        let mut cursor = self.lock_cursor();
        cursor.entries_read += 1;
        cursor.offset = next_offset;
        cursor.maybe_mac &= looks_like_mac_entry(&entry);
        Ok(Some(entry))
    }

    /// Read up to `limit` entries (all remaining when `None`).
    pub async fn read_entries(&self, limit: Option<usize>) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while limit.is_none_or(|limit| entries.len() < limit) {
            match self.read_entry().await? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(entries)
    }

    /// Iterate remaining entries as an async stream.
    pub fn entries(&self) -> impl Stream<Item = Result<Entry>> + '_ {
        futures::stream::try_unfold(self, |archive| async move {
            let entry = archive.read_entry().await?;
            Ok::<_, ZipError>(entry.map(|entry| (entry, archive)))
        })
    }

    /// Parse the Central Directory File Header at `offset`.
    ///
    /// Returns the entry and the offset of the header that follows it.
    async fn decode_entry(&self, offset: u64) -> Result<(Entry, u64)> {
        let header_end = offset
            .checked_add(CentralDirectoryHeader::SIZE as u64)
            .filter(|end| *end <= self.footer_offset)
            .ok_or_else(|| ZipError::format("Invalid Central Directory File Header"))?;
        let header_buf = self
            .reader
            .read(offset, CentralDirectoryHeader::SIZE)
            .await?;
        let header = CentralDirectoryHeader::from_bytes(&header_buf)?;

        if header.flags & FLAG_STRONG_ENCRYPTION != 0 {
            return Err(ZipError::StrongEncryption);
        }

        let variable_len = header.variable_len();
        let next_offset = header_end
            .checked_add(variable_len as u64)
            .filter(|end| *end <= self.footer_offset)
            .ok_or_else(|| ZipError::format("Invalid Central Directory File Header"))?;
        let variable = self.reader.read(header_end, variable_len).await?;

        let name_end = header.file_name_length as usize;
        let extra_end = name_end + header.extra_field_length as usize;
        let raw_name = &variable[..name_end];
        let extra_fields = parse_extra_fields(&variable[name_end..extra_end])?;

        let is_utf8 = header.flags & FLAG_UTF8 != 0;
        let decode = self.options.decode_strings;
        let comment = decode_field(&variable[extra_end..], is_utf8, decode);

        let mut compressed_size = header.compressed_size as u64;
        let mut uncompressed_size = header.uncompressed_size as u64;
        let mut file_header_offset = header.lfh_offset as u64;

        let is_zip64 = header.uncompressed_size == ZIP64_SENTINEL_U32
            || header.compressed_size == ZIP64_SENTINEL_U32
            || header.lfh_offset == ZIP64_SENTINEL_U32;
        if is_zip64 {
            let zip64 = extra_fields
                .iter()
                .find(|field| field.id == EXTRA_ZIP64)
                .ok_or_else(|| {
                    ZipError::format("Expected ZIP64 Extended Information Extra Field")
                })?;
            let mut values = Zip64Values::new(&zip64.data);
            // Only fields whose 32-bit value is the sentinel are present, in this order.
            if header.uncompressed_size == ZIP64_SENTINEL_U32 {
                uncompressed_size = values.next("uncompressed size")?;
            }
            if header.compressed_size == ZIP64_SENTINEL_U32 {
                compressed_size = values.next("compressed size")?;
            }
            if header.lfh_offset == ZIP64_SENTINEL_U32 {
                file_header_offset = values.next("relative header offset")?;
            }
        }

        let mut filename = decode_field(raw_name, is_utf8, decode);
        if decode {
            if let Some(unicode_name) = unicode_path(&extra_fields, raw_name) {
                filename = ZipString::Text(unicode_name);
            }
        }

        if self.options.validate_entry_sizes && header.compression_method == 0 {
            let expected = if header.flags & FLAG_ENCRYPTED != 0 {
                uncompressed_size.saturating_add(ENCRYPTION_HEADER_SIZE)
            } else {
                uncompressed_size
            };
            if compressed_size != expected {
                return Err(ZipError::StoredSizeMismatch {
                    compressed: compressed_size,
                    expected,
                });
            }
        }

        let lfh_fits = file_header_offset
            .checked_add(LocalFileHeader::SIZE as u64)
            .is_some_and(|end| end <= self.footer_offset);
        if !lfh_fits {
            return Err(ZipError::format("Invalid location for file data"));
        }

        if decode && self.options.validate_filenames {
            if let ZipString::Text(name) = &mut filename {
                if !self.options.strict_filenames && name.contains('\\') {
                    *name = name.replace('\\', "/");
                }
                validate_filename(name)?;
            }
        }

        log::trace!(
            "entry {filename} at {offset}: method {}, {compressed_size} -> {uncompressed_size} bytes",
            header.compression_method
        );

        let entry = Entry {
            filename,
            comment,
            compressed_size,
            uncompressed_size,
            compression_method: header.compression_method,
            crc32: header.crc32,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            file_header_offset,
            is_zip64,
            general_purpose_bit_flag: header.flags,
            internal_file_attributes: header.internal_attrs,
            external_file_attributes: header.external_attrs,
            version_made_by: header.version_made_by,
            version_needed_to_extract: header.version_needed,
            extra_fields,
            archive_id: self.id,
        };
        Ok((entry, next_offset))
    }

    /// Open a stream over `entry`'s file data.
    ///
    /// `entry` must come from this archive, and the archive must still be open.
    pub async fn open_read_stream(
        &self,
        entry: &Entry,
        options: ReadStreamOptions,
    ) -> Result<ReadStream> {
        if entry.archive_id != self.id {
            return Err(ZipError::ForeignEntry);
        }
        if !self.is_open() {
            return Err(ZipError::Closed);
        }
        open_entry_stream(
            &self.reader,
            self.footer_offset,
            entry,
            &options,
            &self.options,
        )
        .await
    }
}

/// Archive Utility writes Unix-host, unencrypted, stored or deflated
/// entries without comments or ZIP64 fields, streaming file data with a
/// data descriptor.
fn looks_like_mac_entry(entry: &Entry) -> bool {
    let flags = entry.general_purpose_bit_flag;
    entry.version_made_by == MAC_ARCHIVE_UTILITY_VERSION
        && flags & FLAG_ENCRYPTED == 0
        && (entry.is_directory() || flags & FLAG_DATA_DESCRIPTOR != 0)
        && matches!(entry.compression_method, 0 | 8)
        && entry.comment.is_empty()
        && !entry.is_zip64
}

/// Split an extra field block into `(id, length, data)` records.
fn parse_extra_fields(block: &[u8]) -> Result<Vec<ExtraField>> {
    let mut fields = Vec::new();
    let mut i = 0;
    while i + 4 <= block.len() {
        let id = LittleEndian::read_u16(&block[i..]);
        let len = LittleEndian::read_u16(&block[i + 2..]) as usize;
        let data_start = i + 4;
        let data_end = data_start + len;
        if data_end > block.len() {
            return Err(ZipError::format(
                "Extra field length exceeds extra field buffer size",
            ));
        }
        fields.push(ExtraField {
            id,
            data: block[data_start..data_end].to_vec(),
        });
        i = data_end;
    }
    Ok(fields)
}

/// Sequential 8-byte values of a ZIP64 Extended Information field.
struct Zip64Values<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Zip64Values<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next(&mut self, what: &str) -> Result<u64> {
        if self.pos + 8 > self.data.len() {
            return Err(ZipError::format(format!(
                "ZIP64 Extended Information Extra Field does not include {what}"
            )));
        }
        let value = LittleEndian::read_u64(&self.data[self.pos..]);
        self.pos += 8;
        Ok(value)
    }
}

/// Name from an Info-ZIP Unicode Path field, if one is present and still
/// matches the header's filename bytes.
fn unicode_path(fields: &[ExtraField], raw_name: &[u8]) -> Option<String> {
    let field = fields.iter().find(|field| field.id == EXTRA_UNICODE_PATH)?;
    let data = &field.data;
    // Version, name CRC, and at least one byte of name.
    if data.len() < 6 || data[0] != 1 {
        return None;
    }
    let name_crc = LittleEndian::read_u32(&data[1..5]);
    if crc32fast::hash(raw_name) != name_crc {
        log::debug!("ignoring stale Unicode Path extra field");
        return None;
    }
    Some(decode_bytes(&data[5..], true))
}

/// Locate and parse the EOCDR, plus the ZIP64 records when flagged.
async fn read_footer<R>(reader: &R, size: u64, options: &OpenOptions) -> Result<Footer>
where
    R: RandomAccessReader + ?Sized,
{
    let (eocdr_buf, eocdr_offset) = locate_eocdr(reader, size).await?;
    let eocd = EndOfCentralDirectory::from_bytes(&eocdr_buf)?;

    if eocd.disk_number != 0 {
        return Err(ZipError::MultiDisk);
    }

    let comment_bytes = &eocdr_buf[EndOfCentralDirectory::SIZE..];
    let mut footer = Footer {
        is_zip64: eocd.is_zip64(),
        entry_count: eocd.total_entries as u64,
        footer_offset: eocdr_offset,
        central_directory_offset: eocd.cd_offset as u64,
        central_directory_size: eocd.cd_size as u64,
        // The archive comment has no UTF-8 flag of its own.
        comment: decode_field(comment_bytes, false, options.decode_strings),
    };

    log::debug!("found EOCDR at offset {eocdr_offset}");

    if footer.is_zip64 {
        read_zip64_footer(reader, &eocd, &mut footer).await?;
    }
    Ok(footer)
}

/// Find the End of Central Directory Record.
///
/// Returns the record with its comment and the record's absolute offset.
/// Candidates are tried from the end of the source backwards; the first one
/// whose comment length reaches exactly to the end wins.
async fn locate_eocdr<R>(reader: &R, size: u64) -> Result<(Vec<u8>, u64)>
where
    R: RandomAccessReader + ?Sized,
{
    let min_size = EndOfCentralDirectory::SIZE as u64;
    if size < min_size {
        return Err(ZipError::EocdrNotFound);
    }

    // Common case first: no comment, so the record is the last 22 bytes.
    let offset = size - min_size;
    let buf = reader.read(offset, EndOfCentralDirectory::SIZE).await?;
    if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
        return Ok((buf, offset));
    }

    let search_size = (MAX_COMMENT_SIZE + min_size).min(size);
    let search_start = size - search_size;
    let buf = reader.read(search_start, search_size as usize).await?;

    let last = buf.len() - EndOfCentralDirectory::SIZE;
    for pos in (0..=last).rev() {
        if buf[pos] != 0x50 || &buf[pos..pos + 4] != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let comment_len = LittleEndian::read_u16(&buf[pos + 20..]) as usize;
        if comment_len == last - pos {
            return Ok((buf[pos..].to_vec(), search_start + pos as u64));
        }
    }

    Err(ZipError::EocdrNotFound)
}

/// Apply the ZIP64 locator and record to `footer`.
async fn read_zip64_footer<R>(
    reader: &R,
    eocd: &EndOfCentralDirectory,
    footer: &mut Footer,
) -> Result<()>
where
    R: RandomAccessReader + ?Sized,
{
    // The ZIP64 EOCD Locator is located immediately before the regular EOCD
    let locator_offset = footer
        .footer_offset
        .checked_sub(Zip64EOCDLocator::SIZE as u64)
        .ok_or_else(|| {
            ZipError::format("Cannot locate ZIP64 End of Central Directory Locator")
        })?;
    let locator_buf = reader
        .read(locator_offset, Zip64EOCDLocator::SIZE)
        .await?;
    let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

    let eocd64_offset = locator.eocd64_offset;
    let fits = eocd64_offset
        .checked_add(Zip64EOCD::MIN_SIZE as u64)
        .is_some_and(|end| end <= locator_offset);
    if !fits {
        return Err(ZipError::format(
            "Cannot locate ZIP64 End of Central Directory Record",
        ));
    }
    let eocd64_buf = reader.read(eocd64_offset, Zip64EOCD::MIN_SIZE).await?;
    let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf)?;

    let record_end = eocd64_offset
        .checked_add(eocd64.eocd64_size)
        .and_then(|end| end.checked_add(12))
        .filter(|end| *end <= locator_offset)
        .ok_or_else(|| ZipError::format("Invalid ZIP64 End of Central Directory Record"))?;

    // Each field is only taken from the ZIP64 record when the EOCDR holds its sentinel.
    if eocd.total_entries == ZIP64_SENTINEL_U16 {
        footer.entry_count = eocd64.total_entries;
    }
    if eocd.cd_size == ZIP64_SENTINEL_U32 {
        footer.central_directory_size = eocd64.cd_size;
    }
    if eocd.cd_offset == ZIP64_SENTINEL_U32 {
        footer.central_directory_offset = eocd64.cd_offset;
    }

    footer.footer_offset = if record_end == locator_offset {
        eocd64_offset
    } else {
        locator_offset
    };

    log::debug!(
        "ZIP64 EOCDR at {eocd64_offset}, locator at {locator_offset}, footers start at {}",
        footer.footer_offset
    );
    Ok(())
}
