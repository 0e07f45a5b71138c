//! Value types exchanged with the remote image service.

use serde::{Deserialize, Serialize};

use crate::geom::{Affine, Bounds, Shape};
use crate::raster::BandRange;

/// Everything the service reports about one image.
///
/// Composites and other computed images have no fixed projection: `crs`,
/// `transform` and `shape` are all absent for them, and the export resolver
/// requires the caller to supply the geometry instead.
#[derive(Clone, Debug, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub transform: Option<Affine>,
    #[serde(default)]
    pub shape: Option<Shape>,
    /// Geographic boundary of valid pixels, absent for unbounded images.
    #[serde(default)]
    pub footprint: Option<Bounds>,
    #[serde(default)]
    pub license: Option<String>,
    pub bands: Vec<BandInfo>,
}

impl ImageInfo {
    /// True when the image carries a fixed native pixel grid.
    pub fn has_fixed_projection(&self) -> bool {
        self.crs.is_some() && self.transform.is_some() && self.shape.is_some()
    }

    /// The smallest ground sample distance across bands, if any is reported.
    pub fn min_gsd(&self) -> Option<f64> {
        self.bands
            .iter()
            .filter_map(|b| b.gsd)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Per-band metadata: numeric range plus descriptive fields.
#[derive(Clone, Debug, Deserialize)]
pub struct BandInfo {
    pub name: String,
    pub data_type: BandRange,
    /// Ground sample distance in metres.
    #[serde(default)]
    pub gsd: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Parameters for one per-tile download URL.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DownloadRequest {
    pub crs: String,
    pub crs_transform: [f64; 6],
    pub dimensions: [usize; 2],
    pub dtype: String,
    pub file_per_band: bool,
    pub format: String,
}

impl DownloadRequest {
    /// A single-file GeoTIFF request for one tile window.
    pub fn geotiff(crs: &str, transform: Affine, shape: Shape, dtype: &str) -> Self {
        Self {
            crs: crs.to_string(),
            crs_transform: transform.coefficients(),
            // width x height, the order the service expects
            dimensions: [shape.cols, shape.rows],
            dtype: dtype.to_string(),
            file_per_band: false,
            format: "GEO_TIFF".to_string(),
        }
    }
}

/// Parameters for a server-side export started with
/// [`RemoteImage::start_export`](super::RemoteImage::start_export).
#[derive(Clone, Debug, Serialize)]
pub struct ExportRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    pub crs: String,
    pub crs_transform: [f64; 6],
    pub dimensions: [usize; 2],
    pub dtype: String,
}

/// Server-side export task state, as polled from the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}
