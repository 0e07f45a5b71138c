//! Remote image service collaborators.
//!
//! The service computes imagery server-side; this crate treats each image as
//! an opaque [`RemoteImage`] capability that hands out metadata, per-tile
//! download URLs and export tasks. Transport goes through the [`HttpClient`]
//! seam so tests never touch the network.

mod http;
mod rest;
mod types;

pub use http::{HttpClient, HttpResponse, ProviderError, ReqwestClient, RetryConfig, RetryingClient};
pub use rest::{ExportTask, RemoteImage, RestExportTask, RestImage, RestImageService};
pub use types::{BandInfo, DownloadRequest, ExportRequest, ImageInfo, TaskStatus};
