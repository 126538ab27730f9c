//! Integration tests against LocalStack.
//!
//! Run with a LocalStack container listening on `AWS_ENDPOINT_URL`
//! (default `http://localhost:4566`):
//!
//! ```text
//! cargo test --test integration_s3 -- --ignored
//! ```

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tokio::runtime::Runtime;

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use zipmount::archive::ZipArchive;
use zipmount::config::{ProviderConfig, RemoteLocation};
use zipmount::remote::{ByteSource, MeteredSource, S3Client, S3Source, TransferMetrics};
use zipmount::vfs::NodeKind;
use zipmount::{FilesystemOps, FsError, ZipFs};

/// Test bucket name
const TEST_BUCKET: &str = "zipmount-test-bucket";

fn endpoint_url() -> String {
    std::env::var("AWS_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_string())
}

/// Helper function to create an S3 client pointing to localstack
async fn create_localstack_client() -> Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region("us-east-1")
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .endpoint_url(endpoint_url())
        .force_path_style(true) // Required for LocalStack
        .build();

    Client::from_conf(s3_config)
}

fn test_archive() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file("a.txt", deflated).unwrap();
    writer.write_all(b"hello").unwrap();
    writer.start_file("dir/b.txt", stored).unwrap();
    writer.write_all(b"world").unwrap();
    writer.start_file("dir/numbers.txt", deflated).unwrap();
    for i in 0..20_000 {
        writeln!(writer, "{i}").unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Create the bucket if needed and upload `key`
async fn upload(client: &Client, key: &str, body: Vec<u8>) {
    // Ignore "already exists" from previous runs
    let _ = client.create_bucket().bucket(TEST_BUCKET).send().await;

    client
        .put_object()
        .bucket(TEST_BUCKET)
        .key(key)
        .body(Bytes::from(body).into())
        .send()
        .await
        .expect("Failed to upload test archive");
}

/// Upload the test archive and open it through an [`S3Source`].
///
/// The filesystem must be driven from outside the runtime, so tests run on a
/// plain thread and only hand the runtime's handle to the source.
fn mount_uploaded(runtime: &Runtime, key: &str) -> (ZipFs<ZipArchive>, Arc<TransferMetrics>) {
    let client = runtime.block_on(async {
        let client = create_localstack_client().await;
        upload(&client, key, test_archive()).await;
        client
    });

    let s3 = Arc::new(S3Client::from_client(client));
    let source = S3Source::new(
        s3,
        TEST_BUCKET.to_string(),
        key.to_string(),
        runtime.handle().clone(),
    )
    .expect("Failed to open S3 object");

    let metrics = TransferMetrics::new();
    let source: Arc<dyn ByteSource> =
        Arc::new(MeteredSource::new(source, Arc::clone(&metrics), None));
    let archive = ZipArchive::open(source).expect("Failed to read central directory");

    (ZipFs::new(archive), metrics)
}

#[test]
#[ignore] // Requires localstack
fn test_s3_zip_metadata() {
    let runtime = Runtime::new().unwrap();
    let (fs, metrics) = mount_uploaded(&runtime, "metadata.zip");

    assert_eq!(fs.readdir("/").unwrap(), ["a.txt", "dir"]);
    assert_eq!(fs.readdir("/dir").unwrap(), ["b.txt", "numbers.txt"]);
    assert_eq!(fs.getattr("/a.txt").unwrap().size, 5);
    assert_eq!(fs.getattr("/dir").unwrap().kind, NodeKind::Directory);
    assert!(matches!(fs.getattr("/nope"), Err(FsError::NotFound(_))));

    // Only the trailer and the central directory were fetched
    assert_eq!(metrics.request_count(), 2);
}

#[test]
#[ignore] // Requires localstack
fn test_s3_zip_read() {
    let runtime = Runtime::new().unwrap();
    let (fs, _) = mount_uploaded(&runtime, "read.zip");

    assert_eq!(fs.read("/a.txt", 0, 5).unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(fs.read("/a.txt", 3, 10).unwrap(), Bytes::from_static(b"lo"));
    assert_eq!(fs.read("/dir/b.txt", 0, 5).unwrap(), Bytes::from_static(b"world"));

    let expected: String = (0..20_000).map(|i| format!("{i}\n")).collect();
    let size = fs.getattr("/dir/numbers.txt").unwrap().size;
    assert_eq!(size, expected.len() as u64);

    let tail = fs.read("/dir/numbers.txt", size - 6, 100).unwrap();
    assert_eq!(&tail[..], b"19999\n");

    let middle = fs.read("/dir/numbers.txt", 50_000, 32).unwrap();
    assert_eq!(&middle[..], &expected.as_bytes()[50_000..50_032]);
}

#[test]
#[ignore] // Requires localstack
fn test_s3_client_from_provider_config() {
    let runtime = Runtime::new().unwrap();
    runtime.block_on(async {
        let client = create_localstack_client().await;
        upload(&client, "config.zip", test_archive()).await;
    });

    let location = RemoteLocation::parse(&format!("s3://{TEST_BUCKET}/config.zip")).unwrap();
    let RemoteLocation::S3 { bucket, key } = location else {
        panic!("expected an S3 location");
    };

    let provider = ProviderConfig {
        endpoint_url: Some(endpoint_url()),
        force_path_style: true,
        anonymous: false,
        region: Some("us-east-1".to_string()),
    };
    let client = runtime.block_on(S3Client::new(provider)).unwrap();
    let source = S3Source::new(Arc::new(client), bucket, key, runtime.handle().clone()).unwrap();

    let data = source.read_range(0, 4).unwrap();
    assert_eq!(&data[..], b"PK\x03\x04");
}

#[test]
#[ignore] // Requires localstack
fn test_s3_missing_object() {
    let runtime = Runtime::new().unwrap();
    let client = runtime.block_on(create_localstack_client());
    let result = S3Source::new(
        Arc::new(S3Client::from_client(client)),
        TEST_BUCKET.to_string(),
        "does-not-exist.zip".to_string(),
        runtime.handle().clone(),
    );

    let err = result.err().unwrap();
    assert!(err.to_string().contains("Failed to get metadata"));
}
