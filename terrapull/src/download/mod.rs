//! Download orchestration and the crate's public operations.
//!
//! ```text
//!   resolve ─▶ plan ─▶ [worker pool] ─▶ fetch ─▶ write ─▶ finalize
//!                        cursor, abort       │  mutex  │
//!                        flag shared         ▼         ▼
//!                        across workers   network    mosaic
//! ```
//!
//! Resolution and planning fail before any tile traffic starts. Workers pull
//! tile indices from a shared cursor, fetch outside the write lock and write
//! under it. The first fatal error stops dispatch of new tiles, in-flight
//! tiles drain, and that error is surfaced. The output file is only created
//! at finalization, so a failed job never leaves an artifact behind.

mod config;

pub use config::DownloadConfig;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::export::{resolve, ExportOptions, ExportSpec, ResolveError};
use crate::fetch::{FetchError, TileFetcher};
use crate::provider::{
    ExportRequest, ExportTask, ImageInfo, ProviderError, RemoteImage, RetryingClient,
};
use crate::raster::{
    GeoTiffMetadata, GeoTiffWriteError, Mosaic, MosaicError, RasterProfile, TiffBandMeta,
};
use crate::tiler::{plan_tile_shape, PlanError, Tile, TileGrid};

// ============================================================================
// Errors and progress
// ============================================================================

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("destination '{}' exists (pass overwrite to replace it)", .0.display())]
    DestinationExists(PathBuf),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Mosaic(#[from] MosaicError),

    #[error(transparent)]
    Write(#[from] GeoTiffWriteError),
}

/// Per-tile progress callbacks, invoked from worker threads in completion
/// order (not tile order).
pub trait ProgressObserver: Send + Sync {
    fn on_plan(&self, _total_tiles: usize) {}
    fn on_tile_done(&self, _completed: usize, _total: usize) {}
    fn on_finalized(&self, _path: &Path) {}
}

/// Observer that reports nothing.
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

// ============================================================================
// Job
// ============================================================================

/// Lifecycle of one download job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Planned,
    Running,
    Succeeded,
    Failed,
}

/// One planned download: the tile sequence, the output profile and the
/// fetcher, run to completion by [`DownloadJob::run`].
pub struct DownloadJob {
    tiles: Vec<Tile>,
    profile: RasterProfile,
    fetcher: TileFetcher,
    metadata: GeoTiffMetadata,
    workers: usize,
    state: JobState,
}

impl DownloadJob {
    pub fn new(
        tiles: Vec<Tile>,
        profile: RasterProfile,
        fetcher: TileFetcher,
        metadata: GeoTiffMetadata,
        workers: usize,
    ) -> Self {
        Self {
            tiles,
            profile,
            fetcher,
            metadata,
            workers: workers.max(1),
            state: JobState::Planned,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Fetches every tile into the in-memory mosaic, then encodes the
    /// GeoTIFF at `path`. Consumes the job; terminal state is reported in
    /// the return value and via [`DownloadJob::state`] transitions logged
    /// along the way.
    pub fn run(
        mut self,
        path: &Path,
        observer: &dyn ProgressObserver,
    ) -> Result<(), DownloadError> {
        self.state = JobState::Running;
        let total = self.tiles.len();
        info!(
            tiles = total,
            workers = self.workers,
            shape = %self.profile.shape,
            dtype = %self.profile.dtype,
            "download started"
        );

        let mosaic = Mutex::new(Mosaic::new(self.profile.clone()));
        let cursor = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let first_error: Mutex<Option<DownloadError>> = Mutex::new(None);

        let tiles = &self.tiles;
        let fetcher = &self.fetcher;
        let worker = |_id: usize| {
            loop {
                // no new dispatch once a fatal error is seen
                if abort.load(Ordering::Acquire) {
                    break;
                }
                let i = cursor.fetch_add(1, Ordering::SeqCst);
                if i >= total {
                    break;
                }
                let tile = &tiles[i];
                let result = fetcher
                    .fetch(tile)
                    .map_err(DownloadError::from)
                    .and_then(|array| {
                        mosaic
                            .lock()
                            .write_window(tile.window, &array)
                            .map_err(DownloadError::from)
                    });
                match result {
                    Ok(()) => {
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!(tile = tile.index, done, total, "tile written");
                        observer.on_tile_done(done, total);
                    }
                    Err(e) => {
                        warn!(tile = tile.index, error = %e, "tile failed, aborting job");
                        abort.store(true, Ordering::Release);
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                }
            }
        };

        let worker = &worker;
        thread::scope(|scope| {
            for id in 0..self.workers.min(total) {
                scope.spawn(move || worker(id));
            }
        });

        if let Some(error) = first_error.into_inner() {
            self.state = JobState::Failed;
            return Err(error);
        }

        let mosaic = mosaic.into_inner();
        mosaic.write_geotiff(path, &self.metadata)?;
        self.state = JobState::Succeeded;
        info!(path = %path.display(), "download finalized");
        observer.on_finalized(path);
        Ok(())
    }
}

// ============================================================================
// Public operations
// ============================================================================

/// Downloads `image` to a GeoTIFF at `path`.
///
/// The overwrite check and all resolution/planning failures happen before
/// any tile is requested.
pub fn download(
    image: Arc<dyn RemoteImage>,
    client: Arc<RetryingClient>,
    path: &Path,
    options: &ExportOptions,
    config: &DownloadConfig,
    observer: &dyn ProgressObserver,
) -> Result<(), DownloadError> {
    if path.exists() && !config.overwrite() {
        return Err(DownloadError::DestinationExists(path.to_path_buf()));
    }

    let info = image.info()?;
    let spec = resolve(&info, options)?;
    let profile = RasterProfile::from_export(&spec);
    let tile_shape = plan_tile_shape(spec.shape, spec.count, spec.dtype, config.tile_limits())?;
    let tiles: Vec<Tile> = TileGrid::new(spec.shape, tile_shape, spec.transform).collect();
    observer.on_plan(tiles.len());

    let fetcher = TileFetcher::new(image, client, spec.crs.clone(), spec.dtype, spec.count);
    let job = DownloadJob::new(
        tiles,
        profile,
        fetcher,
        file_metadata(&info),
        config.worker_count(),
    );
    job.run(path, observer)
}

/// Starts a server-side export of `image` under `name`, optionally blocking
/// until the task finishes.
pub fn export(
    image: Arc<dyn RemoteImage>,
    name: impl Into<String>,
    folder: Option<String>,
    options: &ExportOptions,
    wait: bool,
) -> Result<Box<dyn ExportTask>, DownloadError> {
    let info = image.info()?;
    let spec = resolve(&info, options)?;
    let request = export_request(name.into(), folder, &spec);
    let task = image.start_export(&request)?;
    if wait {
        task.wait()?;
    }
    Ok(task)
}

fn export_request(name: String, folder: Option<String>, spec: &ExportSpec) -> ExportRequest {
    ExportRequest {
        name,
        folder,
        crs: spec.crs.clone(),
        crs_transform: spec.transform.coefficients(),
        dimensions: [spec.shape.cols, spec.shape.rows],
        dtype: spec.dtype.name().to_string(),
    }
}

/// Descriptive tags for the finished file, from the image's metadata.
fn file_metadata(info: &ImageInfo) -> GeoTiffMetadata {
    GeoTiffMetadata {
        source_id: Some(info.id.clone()),
        license: info.license.clone(),
        bands: info
            .bands
            .iter()
            .map(|band| TiffBandMeta {
                name: band.name.clone(),
                description: band.description.clone(),
                gsd: band.gsd,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DownloadRequest, HttpClient, HttpResponse, RetryConfig};
    use crate::raster::BandRange;
    use std::sync::atomic::AtomicUsize;

    /// Transport that fails the test if any request goes out.
    struct NoNetworkClient {
        calls: AtomicUsize,
    }

    impl HttpClient for NoNetworkClient {
        fn get(&self, url: &str) -> Result<HttpResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport {
                url: url.to_string(),
                message: "network disabled in test".to_string(),
            })
        }

        fn post_json(
            &self,
            url: &str,
            _body: &serde_json::Value,
        ) -> Result<HttpResponse, ProviderError> {
            self.get(url)
        }
    }

    /// Image whose metadata is local; any URL request counts as network.
    struct LocalImage {
        info: ImageInfo,
        url_calls: AtomicUsize,
    }

    impl RemoteImage for LocalImage {
        fn info(&self) -> Result<ImageInfo, ProviderError> {
            Ok(self.info.clone())
        }

        fn download_url(&self, _request: &DownloadRequest) -> Result<String, ProviderError> {
            self.url_calls.fetch_add(1, Ordering::SeqCst);
            Ok("http://svc/blob".to_string())
        }

        fn start_export(
            &self,
            _request: &ExportRequest,
        ) -> Result<Box<dyn ExportTask>, ProviderError> {
            unimplemented!("not exercised")
        }
    }

    fn composite_info() -> ImageInfo {
        ImageInfo {
            id: "composite".to_string(),
            crs: None,
            transform: None,
            shape: None,
            footprint: None,
            license: None,
            bands: vec![crate::provider::BandInfo {
                name: "B1".to_string(),
                data_type: BandRange::int(0.0, 255.0),
                gsd: None,
                description: None,
            }],
        }
    }

    fn no_network() -> (Arc<LocalImage>, Arc<RetryingClient>) {
        let image = Arc::new(LocalImage {
            info: composite_info(),
            url_calls: AtomicUsize::new(0),
        });
        let client = Arc::new(RetryingClient::new(
            Box::new(NoNetworkClient {
                calls: AtomicUsize::new(0),
            }),
            RetryConfig::default().with_retries(0).with_backoff_factor(0.0),
        ));
        (image, client)
    }

    #[test]
    fn test_unbounded_export_fails_with_zero_network_calls() {
        let (image, client) = no_network();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let err = download(
            Arc::clone(&image) as Arc<dyn RemoteImage>,
            client,
            &path,
            &ExportOptions::default(),
            &DownloadConfig::new(),
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Resolve(ResolveError::UnboundedExport(_))
        ));
        assert_eq!(image.url_calls.load(Ordering::SeqCst), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_destination_is_guarded() {
        let (image, client) = no_network();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        std::fs::write(&path, b"keep me").unwrap();
        let err = download(
            image as Arc<dyn RemoteImage>,
            client,
            &path,
            &ExportOptions::default(),
            &DownloadConfig::new(),
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, DownloadError::DestinationExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_failed_fetch_leaves_no_artifact() {
        // bounded image, but every tile request hits the dead transport
        let info = ImageInfo {
            id: "img".to_string(),
            crs: Some("EPSG:32634".to_string()),
            transform: Some(crate::geom::Affine::north_up(0.0, 100.0, 10.0)),
            shape: Some(crate::geom::Shape::new(10, 10)),
            footprint: None,
            license: None,
            bands: vec![crate::provider::BandInfo {
                name: "B1".to_string(),
                data_type: BandRange::int(0.0, 255.0),
                gsd: None,
                description: None,
            }],
        };
        let image = Arc::new(LocalImage {
            info,
            url_calls: AtomicUsize::new(0),
        });
        let client = Arc::new(RetryingClient::new(
            Box::new(NoNetworkClient {
                calls: AtomicUsize::new(0),
            }),
            RetryConfig::default().with_retries(0).with_backoff_factor(0.0),
        ));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let err = download(
            image as Arc<dyn RemoteImage>,
            client,
            &path,
            &ExportOptions::default(),
            &DownloadConfig::new().with_workers(2),
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, DownloadError::Fetch(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_job_starts_planned() {
        let (image, client) = no_network();
        let spec = ExportSpec {
            crs: "EPSG:32634".to_string(),
            transform: crate::geom::Affine::identity(),
            shape: crate::geom::Shape::new(4, 4),
            dtype: crate::raster::Dtype::U8,
            count: 1,
            resampling: crate::export::Resampling::Nearest,
            scale_offset: false,
        };
        let fetcher = TileFetcher::new(
            image as Arc<dyn RemoteImage>,
            client,
            spec.crs.clone(),
            spec.dtype,
            spec.count,
        );
        let job = DownloadJob::new(
            Vec::new(),
            RasterProfile::from_export(&spec),
            fetcher,
            GeoTiffMetadata::default(),
            4,
        );
        assert_eq!(job.state(), JobState::Planned);
        assert_eq!(job.tile_count(), 0);
    }
}
