use anyhow::{Result, anyhow};
use std::fmt;
use std::path::PathBuf;

/// Configuration for creating an S3 client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Optional custom endpoint URL
    pub endpoint_url: Option<String>,
    /// Whether to use path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,
    /// Whether to skip credentials (for anonymous/public access)
    pub anonymous: bool,
    /// Optional region override
    pub region: Option<String>,
}

/// Where the archive lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLocation {
    /// An object in an S3 bucket (`s3://bucket/key`)
    S3 { bucket: String, key: String },
    /// A file on an HTTP(S) server that supports range requests
    Http { url: String },
}

impl RemoteLocation {
    /// Classify a remote resource locator
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| anyhow!("S3 URL must name an object: {url}"))?;
            if bucket.is_empty() || key.is_empty() || key.ends_with('/') {
                return Err(anyhow!("S3 URL must name an object: {url}"));
            }
            return Ok(RemoteLocation::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(RemoteLocation::Http {
                url: url.to_string(),
            });
        }

        Err(anyhow!(
            "Unsupported URL (expected s3://, http:// or https://): {url}"
        ))
    }

    /// Last path component, used in progress messages
    pub fn file_name(&self) -> &str {
        let path = match self {
            RemoteLocation::S3 { key, .. } => key.as_str(),
            RemoteLocation::Http { url } => url.split(['?', '#']).next().unwrap_or(url),
        };
        path.rsplit('/').next().unwrap_or(path)
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteLocation::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            RemoteLocation::Http { url } => write!(f, "{url}"),
        }
    }
}

/// Everything needed to mount one archive
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub location: RemoteLocation,
    pub mountpoint: PathBuf,
    /// Show fetch progress and debug logging
    pub verbose: bool,
    /// S3 client settings (ignored for HTTP sources)
    pub provider: ProviderConfig,
}

impl MountConfig {
    pub fn new(url: &str, mountpoint: impl Into<PathBuf>) -> Result<Self> {
        Ok(MountConfig {
            location: RemoteLocation::parse(url)?,
            mountpoint: mountpoint.into(),
            verbose: false,
            provider: ProviderConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_url() {
        let loc = RemoteLocation::parse("s3://my-bucket/data/archive.zip").unwrap();
        assert_eq!(
            loc,
            RemoteLocation::S3 {
                bucket: "my-bucket".to_string(),
                key: "data/archive.zip".to_string()
            }
        );
        assert_eq!(loc.file_name(), "archive.zip");
        assert_eq!(loc.to_string(), "s3://my-bucket/data/archive.zip");
    }

    #[test]
    fn test_parse_s3_url_requires_key() {
        assert!(RemoteLocation::parse("s3://my-bucket").is_err());
        assert!(RemoteLocation::parse("s3://my-bucket/").is_err());
        assert!(RemoteLocation::parse("s3://my-bucket/prefix/").is_err());
    }

    #[test]
    fn test_parse_http_url() {
        let loc = RemoteLocation::parse("https://example.com/files/big.zip?sig=abc").unwrap();
        assert!(matches!(loc, RemoteLocation::Http { .. }));
        assert_eq!(loc.file_name(), "big.zip");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = RemoteLocation::parse("ftp://example.com/a.zip").unwrap_err();
        assert!(err.to_string().contains("Unsupported URL"));
        assert!(RemoteLocation::parse("/local/a.zip").is_err());
    }

    #[test]
    fn test_mount_config_defaults() {
        let config = MountConfig::new("http://localhost/a.zip", "/mnt/a").unwrap();
        assert!(!config.verbose);
        assert_eq!(config.provider, ProviderConfig::default());
        assert_eq!(config.mountpoint, PathBuf::from("/mnt/a"));
    }
}
