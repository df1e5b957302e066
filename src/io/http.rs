use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::RandomAccessReader;
use crate::error::Result;

/// HTTP Range reader for remote ZIP files
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
}

fn http_error(err: reqwest::Error) -> io::Error {
    io::Error::other(err)
}

impl HttpRangeReader {
    /// Create a new HTTP Range reader
    ///
    /// This will send a HEAD request to verify Range support and get file size
    pub async fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_error)?;

        let resp = client.head(&url).send().await.map_err(http_error)?;

        if !resp.status().is_success() {
            return Err(io::Error::other(format!(
                "HTTP request failed with status: {}",
                resp.status()
            ))
            .into());
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Remote server does not support Range requests",
            )
            .into());
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| io::Error::other("Remote server did not return Content-Length"))?;

        log::debug!("opened {url} over HTTP ({size} bytes)");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RandomAccessReader for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let range = format!("bytes={offset}-{end}");

        let resp = self
            .client
            .get(&self.url)
            .header("Range", &range)
            .send()
            .await
            .map_err(http_error)?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(io::Error::other(format!(
                "HTTP request for {range} failed with status: {}",
                resp.status()
            ))
            .into());
        }

        let bytes = resp.bytes().await.map_err(http_error)?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);

        log::trace!("fetched {n} bytes ({range})");
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
