use anyhow::{Context, Result};
use aws_sdk_s3::Client;
use bytes::Bytes;
use log::debug;
use std::sync::Arc;
use tokio::runtime::Handle;

use super::{ByteSource, check_range};
use crate::config::ProviderConfig;

/// Wrapper around the AWS S3 client, limited to what ranged archive reads need
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a client from a provider configuration
    pub async fn new(config: ProviderConfig) -> Result<Self> {
        let mut sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if config.anonymous {
            sdk_config = sdk_config.no_credentials();
        }

        if let Some(region) = config.region {
            sdk_config = sdk_config.region(aws_config::Region::new(region));
        }

        let base_config = sdk_config.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&base_config);

        if let Some(endpoint) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Ok(Self::from_client(Client::from_conf(s3_config_builder.build())))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client) -> Self {
        S3Client { client }
    }

    /// Get an object's size in bytes
    pub async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!("Failed to get metadata for s3://{}/{}", bucket, key))?;

        Ok(resp.content_length().unwrap_or(0) as u64)
    }

    /// Get a range of bytes from an object
    pub async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset + length - 1);

        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .context(format!("Failed to get object range s3://{}/{}", bucket, key))?;

        let bytes = resp
            .body
            .collect()
            .await
            .context("Failed to read object body")?
            .into_bytes();

        Ok(bytes)
    }
}

/// A single S3 object exposed as a [`ByteSource`].
///
/// The filesystem runs synchronously, so every range request is driven to
/// completion on `runtime`. Must not be called from inside that runtime.
pub struct S3Source {
    client: Arc<S3Client>,
    bucket: String,
    key: String,
    size: u64,
    runtime: Handle,
}

impl S3Source {
    /// Look up the object's size and prepare for range reads
    pub fn new(client: Arc<S3Client>, bucket: String, key: String, runtime: Handle) -> Result<Self> {
        let size = runtime.block_on(client.object_size(&bucket, &key))?;
        debug!("s3://{}/{} is {} bytes", bucket, key, size);

        Ok(S3Source {
            client,
            bucket,
            key,
            size,
            runtime,
        })
    }
}

impl ByteSource for S3Source {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        check_range(offset, length, self.size)?;
        self.runtime.block_on(
            self.client
                .get_object_range(&self.bucket, &self.key, offset, length),
        )
    }
}
