//! Shared helpers for integration tests: an in-memory archive builder and
//! instrumented readers.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ziprange::{BufferReader, RandomAccessReader, ReadStream};

/// 2017-04-21 10:35:20 in MS-DOS format.
pub const DOS_TIME: u16 = (10 << 11) | (35 << 5) | 10;
pub const DOS_DATE: u16 = ((2017 - 1980) << 9) | (4 << 5) | 21;

/// "Version made by" for an archive created on Unix by zip 3.0.
pub const MADE_BY_UNIX: u16 = 0x031e;

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

/// One member of a test archive.
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub method: u16,
    pub flags: u16,
    pub version_made_by: u16,
    pub external_attrs: u32,
    /// Central Directory extra field block.
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    /// Bytes stored in place of the (compressed) data.
    pub payload: Option<Vec<u8>>,
    /// Uncompressed size written to the headers instead of `data.len()`.
    pub declared_size: Option<u32>,
}

impl TestEntry {
    pub fn stored(name: impl AsRef<[u8]>, data: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            data: data.as_ref().to_vec(),
            method: 0,
            flags: 0,
            version_made_by: MADE_BY_UNIX,
            external_attrs: 0o100644 << 16,
            extra: Vec::new(),
            comment: Vec::new(),
            payload: None,
            declared_size: None,
        }
    }

    pub fn deflated(name: impl AsRef<[u8]>, data: impl AsRef<[u8]>) -> Self {
        Self {
            method: 8,
            ..Self::stored(name, data)
        }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn attrs(mut self, version_made_by: u16, external_attrs: u32) -> Self {
        self.version_made_by = version_made_by;
        self.external_attrs = external_attrs;
        self
    }

    pub fn extra_field(mut self, id: u16, data: &[u8]) -> Self {
        self.extra.extend_from_slice(&id.to_le_bytes());
        self.extra
            .extend_from_slice(&(data.len() as u16).to_le_bytes());
        self.extra.extend_from_slice(data);
        self
    }

    pub fn comment(mut self, comment: impl AsRef<[u8]>) -> Self {
        self.comment = comment.as_ref().to_vec();
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn method(mut self, method: u16) -> Self {
        self.method = method;
        self
    }

    pub fn declared_size(mut self, size: u32) -> Self {
        self.declared_size = Some(size);
        self
    }

    fn stored_bytes(&self) -> Vec<u8> {
        match (&self.payload, self.method) {
            (Some(payload), _) => payload.clone(),
            (None, 8) => deflate(&self.data),
            (None, _) => self.data.clone(),
        }
    }
}

/// Assembles archives in memory.
#[derive(Debug, Default)]
pub struct ZipBuilder {
    entries: Vec<TestEntry>,
    comment: Vec<u8>,
    force_zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(mut self, entries: impl IntoIterator<Item = TestEntry>) -> Self {
        self.entries.extend(entries);
        self
    }

    pub fn comment(mut self, comment: impl AsRef<[u8]>) -> Self {
        self.comment = comment.as_ref().to_vec();
        self
    }

    /// Write every size/offset through ZIP64 records, even when small.
    pub fn zip64(mut self) -> Self {
        self.force_zip64 = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let offset = out.len() as u64;
            let stored = entry.stored_bytes();
            let crc = crc32fast::hash(&entry.data);
            let size = entry.declared_size.unwrap_or(entry.data.len() as u32);

            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, 20);
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, DOS_TIME);
            put16(&mut out, DOS_DATE);
            put32(&mut out, crc);
            put32(&mut out, stored.len() as u32);
            put32(&mut out, size);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, 0);
            out.extend_from_slice(&entry.name);
            out.extend_from_slice(&stored);

            let mut extra = Vec::new();
            let (csize, usize_, lfh) = if self.force_zip64 {
                extra.extend_from_slice(&1u16.to_le_bytes());
                extra.extend_from_slice(&24u16.to_le_bytes());
                extra.extend_from_slice(&(size as u64).to_le_bytes());
                extra.extend_from_slice(&(stored.len() as u64).to_le_bytes());
                extra.extend_from_slice(&offset.to_le_bytes());
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (stored.len() as u32, size, offset as u32)
            };
            extra.extend_from_slice(&entry.extra);

            central.extend_from_slice(b"PK\x01\x02");
            put16(&mut central, entry.version_made_by);
            put16(&mut central, 20);
            put16(&mut central, entry.flags);
            put16(&mut central, entry.method);
            put16(&mut central, DOS_TIME);
            put16(&mut central, DOS_DATE);
            put32(&mut central, crc);
            put32(&mut central, csize);
            put32(&mut central, usize_);
            put16(&mut central, entry.name.len() as u16);
            put16(&mut central, extra.len() as u16);
            put16(&mut central, entry.comment.len() as u16);
            put16(&mut central, 0);
            put16(&mut central, 0);
            put32(&mut central, entry.external_attrs);
            put32(&mut central, lfh);
            central.extend_from_slice(&entry.name);
            central.extend_from_slice(&extra);
            central.extend_from_slice(&entry.comment);
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        out.extend_from_slice(&central);

        let count = self.entries.len() as u64;
        let zip64 = self.force_zip64 || count >= 0xFFFF;
        if zip64 {
            write_zip64_footers(&mut out, count, cd_size, cd_offset);
        }

        let count16 = if zip64 { 0xFFFF } else { count as u16 };
        let (size32, offset32) = if self.force_zip64 {
            (u32::MAX, u32::MAX)
        } else {
            (cd_size as u32, cd_offset as u32)
        };
        write_eocdr(&mut out, count16, size32, offset32, &self.comment);
        out
    }
}

pub fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Append a ZIP64 EOCDR immediately followed by its locator.
pub fn write_zip64_footers(out: &mut Vec<u8>, count: u64, cd_size: u64, cd_offset: u64) {
    let eocd64_offset = out.len() as u64;
    out.extend_from_slice(b"PK\x06\x06");
    put64(out, 44);
    put16(out, 45);
    put16(out, 45);
    put32(out, 0);
    put32(out, 0);
    put64(out, count);
    put64(out, count);
    put64(out, cd_size);
    put64(out, cd_offset);

    out.extend_from_slice(b"PK\x06\x07");
    put32(out, 0);
    put64(out, eocd64_offset);
    put32(out, 1);
}

pub fn write_eocdr(out: &mut Vec<u8>, count: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) {
    out.extend_from_slice(b"PK\x05\x06");
    put16(out, 0);
    put16(out, 0);
    put16(out, count);
    put16(out, count);
    put32(out, cd_size);
    put32(out, cd_offset);
    put16(out, comment.len() as u16);
    out.extend_from_slice(comment);
}

/// Records the length of every stream opened on it.
pub struct RecordingReader {
    inner: Arc<BufferReader>,
    pub stream_lengths: Mutex<Vec<u64>>,
}

impl RecordingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(BufferReader::new(data)),
            stream_lengths: Mutex::new(Vec::new()),
        }
    }

    pub fn take_lengths(&self) -> Vec<u64> {
        std::mem::take(&mut *self.stream_lengths.lock().unwrap())
    }
}

#[async_trait]
impl RandomAccessReader for RecordingReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ziprange::Result<usize> {
        self.inner.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn create_read_stream(
        self: Arc<Self>,
        offset: u64,
        length: u64,
    ) -> ziprange::Result<ReadStream> {
        self.stream_lengths.lock().unwrap().push(length);
        Arc::clone(&self.inner).create_read_stream(offset, length)
    }
}

/// Suspends once before every read, so overlapping calls really overlap.
pub struct YieldingReader {
    inner: BufferReader,
    pub closed: Mutex<bool>,
}

impl YieldingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: BufferReader::new(data),
            closed: Mutex::new(false),
        }
    }
}

#[async_trait]
impl RandomAccessReader for YieldingReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ziprange::Result<usize> {
        tokio::task::yield_now().await;
        self.inner.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    async fn close(&self) -> ziprange::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Source made of a real prefix, a long run of virtual bytes, and a real
/// suffix, so multi-GiB archives can be described without allocating them.
pub struct SparseReader {
    pub prefix: Vec<u8>,
    pub gap: u64,
    pub fill: u8,
    pub suffix: Vec<u8>,
}

#[async_trait]
impl RandomAccessReader for SparseReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ziprange::Result<usize> {
        let prefix_len = self.prefix.len() as u64;
        let suffix_start = prefix_len + self.gap;

        let n = if offset < prefix_len {
            let start = offset as usize;
            let n = buf.len().min(self.prefix.len() - start);
            buf[..n].copy_from_slice(&self.prefix[start..start + n]);
            n
        } else if offset < suffix_start {
            let n = (buf.len() as u64).min(suffix_start - offset) as usize;
            buf[..n].fill(self.fill);
            n
        } else {
            let start = ((offset - suffix_start) as usize).min(self.suffix.len());
            let n = buf.len().min(self.suffix.len() - start);
            buf[..n].copy_from_slice(&self.suffix[start..start + n]);
            n
        };
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.prefix.len() as u64 + self.gap + self.suffix.len() as u64
    }
}
