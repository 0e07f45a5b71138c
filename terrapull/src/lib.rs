//! TerraPull fetches large rasters from a size-limited remote imagery API
//! in tiles and reassembles them into one geo-referenced GeoTIFF.
//!
//! The pipeline: [`export::resolve`] turns image metadata plus user options
//! into a fully-determined [`export::ExportSpec`]; [`tiler`] partitions the
//! output raster into request-sized tiles; [`download::download`] runs the
//! tile fetches across a worker pool, assembles the [`raster::Mosaic`] and
//! finalizes the file. The remote service is reached through the
//! [`provider`] traits, so everything above the transport is testable
//! without a network.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use terrapull::download::{download, DownloadConfig, NoProgress};
//! use terrapull::export::ExportOptions;
//! use terrapull::provider::{ReqwestClient, RestImageService, RetryConfig, RetryingClient};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let retry = RetryConfig::default();
//! let transport = ReqwestClient::new(retry.timeout)?;
//! let client = Arc::new(RetryingClient::new(Box::new(transport), retry));
//! let service = RestImageService::new(
//!     RetryingClient::new(Box::new(ReqwestClient::new(std::time::Duration::from_secs(30))?),
//!                         RetryConfig::default()),
//!     "https://imagery.example.com/v1",
//! );
//! let image = Arc::new(service.image("COLLECTION/IMG_001"));
//! download(
//!     image,
//!     client,
//!     Path::new("image.tif"),
//!     &ExportOptions::default(),
//!     &DownloadConfig::new(),
//!     &NoProgress,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod export;
pub mod fetch;
pub mod geom;
pub mod provider;
pub mod raster;
pub mod tiler;

pub use download::{download, DownloadConfig, DownloadError, ProgressObserver};
pub use export::{ExportOptions, ExportSpec, Resampling};
pub use provider::{RemoteImage, RestImageService};
