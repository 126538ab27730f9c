//! Transfer metrics for remote range requests.
//!
//! Tracks bytes fetched, request count and time spent waiting on the
//! network, so a mount can report what browsing an archive actually cost.

use anyhow::Result;
use bytes::Bytes;
use humansize::{DECIMAL, format_size};
use indicatif::ProgressBar;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::ByteSource;

/// Collector for range request metrics
#[derive(Debug)]
pub struct TransferMetrics {
    /// Total bytes transferred
    total_bytes: AtomicU64,
    /// Total number of requests
    request_count: AtomicUsize,
    /// Number of failed requests
    failure_count: AtomicUsize,
    /// Total time spent in requests (nanoseconds)
    total_request_time_ns: AtomicU64,
    created: Instant,
}

impl Default for TransferMetrics {
    fn default() -> Self {
        TransferMetrics {
            total_bytes: AtomicU64::new(0),
            request_count: AtomicUsize::new(0),
            failure_count: AtomicUsize::new(0),
            total_request_time_ns: AtomicU64::new(0),
            created: Instant::now(),
        }
    }
}

impl TransferMetrics {
    /// Create a new metrics collector wrapped in Arc for sharing
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a completed request
    pub fn record_request(&self, bytes: u64, duration: Duration) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_request_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a request that returned an error
    pub fn record_failure(&self, duration: Duration) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_request_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn total_request_time(&self) -> Duration {
        Duration::from_nanos(self.total_request_time_ns.load(Ordering::Relaxed))
    }

    /// Time since the collector was created
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} range requests ({} failed), {} fetched, {:.2?} waiting on the network",
            self.request_count(),
            self.failure_count(),
            format_size(self.total_bytes(), DECIMAL),
            self.total_request_time()
        )
    }
}

/// A [`ByteSource`] decorator that records every fetch in [`TransferMetrics`]
/// and reports the running totals on an attached progress bar until the bar
/// is finished. The bar's owner controls its lifetime and ticking.
pub struct MeteredSource<S> {
    inner: S,
    metrics: Arc<TransferMetrics>,
    progress: Option<ProgressBar>,
}

impl<S: ByteSource> MeteredSource<S> {
    pub fn new(inner: S, metrics: Arc<TransferMetrics>, progress: Option<ProgressBar>) -> Self {
        MeteredSource {
            inner,
            metrics,
            progress,
        }
    }
}

impl<S: ByteSource> ByteSource for MeteredSource<S> {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Bytes> {
        let start = Instant::now();
        let result = self.inner.read_range(offset, length);
        let duration = start.elapsed();

        match &result {
            Ok(bytes) => {
                debug!(
                    "fetched {} bytes at offset {} in {:.2?}",
                    bytes.len(),
                    offset,
                    duration
                );
                self.metrics.record_request(bytes.len() as u64, duration);
            }
            Err(_) => self.metrics.record_failure(duration),
        }

        if let Some(pb) = self.progress.as_ref().filter(|pb| !pb.is_finished()) {
            pb.set_message(format!(
                "{} ranges, {} fetched",
                self.metrics.request_count(),
                format_size(self.metrics.total_bytes(), DECIMAL)
            ));
        }

        result
    }
}
