use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use std::time::Duration;

use super::{ByteSource, check_range};

/// Timeout for a single range request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A file served over HTTP(S) by a server that honours `Range` requests
pub struct HttpSource {
    client: Client,
    url: String,
    size: u64,
}

impl HttpSource {
    /// Probe the URL for its size and range support
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        let size = Self::fetch_size(&client, url)?;
        debug!("{} is {} bytes", url, size);

        Ok(HttpSource {
            client,
            url: url.to_string(),
            size,
        })
    }

    /// Determine the object size, first via HEAD and then via a one-byte range
    /// request for servers that do not report a length on HEAD
    fn fetch_size(client: &Client, url: &str) -> Result<u64> {
        let head = client
            .head(url)
            .send()
            .context(format!("Failed to reach {}", url))?;

        if !head.status().is_success() {
            return Err(anyhow!("HEAD {} returned {}", url, head.status()));
        }

        if head
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("none"))
        {
            return Err(anyhow!("{} does not support range requests", url));
        }

        if let Some(length) = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&len| len > 0)
        {
            return Ok(length);
        }

        let ranged = client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .context(format!("Failed to fetch size of {}", url))?;

        ranged
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| anyhow!("Could not determine size of {}", url))
    }
}

/// Extract the total length from a `Content-Range: bytes a-b/total` header
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

impl ByteSource for HttpSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        check_range(offset, length, self.size)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, range)
            .send()
            .context(format!("Failed to get range of {}", self.url))?;

        let status = resp.status();
        let whole_object = offset == 0 && length == self.size;
        if status != StatusCode::PARTIAL_CONTENT && !(status == StatusCode::OK && whole_object) {
            return Err(anyhow!(
                "Range request to {} returned {} (expected 206 Partial Content)",
                self.url,
                status
            ));
        }

        let bytes = resp.bytes().context("Failed to read response body")?;
        if bytes.len() as u64 != length {
            return Err(anyhow!(
                "Short range response from {}: expected {} bytes, got {}",
                self.url,
                length,
                bytes.len()
            ));
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }
}
