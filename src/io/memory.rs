use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ReadStream, RandomAccessReader, check_range};
use crate::error::Result;

/// In-memory archive source.
#[derive(Debug, Clone)]
pub struct BufferReader {
    data: Bytes,
}

impl BufferReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl RandomAccessReader for BufferReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn create_read_stream(self: Arc<Self>, offset: u64, length: u64) -> Result<ReadStream> {
        check_range(offset, length, self.size())?;
        let start = offset as usize;
        let slice = self.data.slice(start..start + length as usize);
        Ok(Box::pin(std::io::Cursor::new(slice)))
    }
}
