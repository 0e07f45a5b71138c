//! Download command - fetch an image into a local GeoTIFF.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use terrapull::download::{download, DownloadConfig};
use terrapull::provider::RemoteImage;
use terrapull::tiler::TileLimits;

use crate::commands::common::{BarProgress, GeometryArgs, ServiceArgs};
use crate::error::CliError;

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Image identifier on the service
    pub image: String,

    /// Destination GeoTIFF path
    pub dest: PathBuf,

    #[command(flatten)]
    pub geometry: GeometryArgs,

    #[command(flatten)]
    pub service: ServiceArgs,

    /// Replace the destination file if it exists
    #[arg(long)]
    pub overwrite: bool,

    /// Worker pool size (default: CPU cores - 1)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum tile payload size in bytes
    #[arg(long)]
    pub max_tile_bytes: Option<u64>,

    /// Maximum tile edge length in pixels
    #[arg(long)]
    pub max_tile_dim: Option<usize>,
}

/// Run the download command.
pub fn run(args: DownloadArgs) -> Result<(), CliError> {
    let options = args.geometry.to_options()?;
    let image = args.service.image(&args.image)?;
    let client = args.service.tile_client()?;

    let defaults = TileLimits::default();
    let limits = TileLimits {
        max_tile_bytes: args.max_tile_bytes.unwrap_or(defaults.max_tile_bytes),
        max_tile_dim: args.max_tile_dim.unwrap_or(defaults.max_tile_dim),
    };
    let mut config = DownloadConfig::new()
        .with_tile_limits(limits)
        .with_retry(args.service.retry_config())
        .with_overwrite(args.overwrite);
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    println!("Downloading {} to {}", args.image, args.dest.display());
    let progress = BarProgress::new();
    download(
        image as Arc<dyn RemoteImage>,
        client,
        &args.dest,
        &options,
        &config,
        &progress,
    )?;
    println!("Wrote {}", args.dest.display());
    Ok(())
}
