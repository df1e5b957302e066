use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::RandomAccessReader;
use crate::error::Result;

/// Local file reader with random access support
///
/// Reads are positioned (`pread`-style), so any number of entry streams can
/// read concurrently without sharing a file cursor.
pub struct LocalFileReader {
    file: Mutex<Option<Arc<File>>>,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(Some(Arc::new(file))),
            size,
        })
    }

    /// Whether [`close`](RandomAccessReader::close) has not been called yet.
    pub fn is_open(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn handle(&self) -> io::Result<Arc<File>> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| io::Error::other("file reader is closed"))
    }
}

/// One positioned read, without touching any shared file cursor.
fn read_at_blocking(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_at(buf, offset)
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        file.seek_read(buf, offset)
    }

    #[cfg(not(any(unix, windows)))]
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = file;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

#[async_trait]
impl RandomAccessReader for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.handle()?;
        let len = buf.len();

        // Disk reads block, so they run on the blocking pool.
        let (n, chunk) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; len];
            let n = read_at_blocking(&file, offset, &mut chunk)?;
            Ok::<_, io::Error>((n, chunk))
        })
        .await
        .map_err(io::Error::other)??;

        buf[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&self) -> Result<()> {
        // In-flight reads keep their own handle; the descriptor goes away with the last one.
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
