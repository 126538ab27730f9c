use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use env_logger::Env;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use zipmount::archive::ZipArchive;
use zipmount::config::{MountConfig, ProviderConfig};
use zipmount::remote::{self, TransferMetrics};
use zipmount::ui::create_spinner;
use zipmount::{ZipFs, fuse};

/// Mount a remote ZIP archive as a read-only filesystem.
///
/// Only the central directory is fetched up front; file contents are fetched
/// with range requests as they are read.
#[derive(Parser, Debug)]
#[command(name = "zipmount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Archive location: s3://bucket/key or an http(s) URL
    #[arg(value_name = "URL")]
    url: String,

    /// Directory to mount the archive on
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,

    /// Show download progress and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Custom S3 endpoint (implies path-style addressing)
    #[arg(long, value_name = "URL")]
    endpoint_url: Option<String>,

    /// Access S3 without credentials
    #[arg(long)]
    anonymous: bool,

    /// S3 region override
    #[arg(long)]
    region: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<MountConfig> {
        let mut config = MountConfig::new(&self.url, self.mountpoint)?;
        config.verbose = self.verbose;
        config.provider = ProviderConfig {
            force_path_style: self.endpoint_url.is_some(),
            endpoint_url: self.endpoint_url,
            anonymous: self.anonymous,
            region: self.region,
        };
        Ok(config)
    }
}

fn run(config: MountConfig) -> Result<()> {
    if !config.mountpoint.is_dir() {
        anyhow::bail!("Mount point is not a directory: {}", config.mountpoint.display());
    }

    // The runtime only drives S3 requests; the FUSE loop runs outside it
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let metrics = TransferMetrics::new();

    let spinner = create_spinner(&format!(
        "Reading central directory of {}...",
        config.location.file_name()
    ));
    // In verbose mode the spinner also counts the range requests behind it
    let progress = config.verbose.then(|| spinner.clone());
    let opened = remote::open_source(&config, runtime.handle(), Arc::clone(&metrics), progress)
        .and_then(ZipArchive::open);
    spinner.finish_and_clear();

    let archive = opened.with_context(|| format!("Failed to open {}", config.location))?;
    let fs = ZipFs::new(archive);
    let (files, bytes) = fs.index().file_totals();
    info!(
        "{}: {} files, {} uncompressed, mounted at {}",
        config.location,
        files,
        humansize::format_size(bytes, humansize::DECIMAL),
        config.mountpoint.display()
    );

    fuse::mount(fs, &config.mountpoint)
        .with_context(|| format!("Failed to mount on {}", config.mountpoint.display()))?;

    info!("Unmounted after {:.0?}: {}", metrics.elapsed(), metrics.summary());
    Ok(())
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let result = args.into_config().and_then(run);
    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
