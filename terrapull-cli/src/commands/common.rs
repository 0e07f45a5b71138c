//! Argument groups and parsing shared across CLI commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget};
use terrapull::download::ProgressObserver;
use terrapull::export::ExportOptions;
use terrapull::geom::{Affine, Bounds, Shape};
use terrapull::provider::{
    ReqwestClient, RestImage, RestImageService, RetryConfig, RetryingClient,
};
use terrapull::raster::Dtype;

use crate::error::CliError;

/// Geometry and dtype overrides shared by `download` and `export`.
#[derive(Args, Debug)]
pub struct GeometryArgs {
    /// Target CRS, e.g. EPSG:32634
    #[arg(long)]
    pub crs: Option<String>,

    /// Pixel-to-CRS transform as six comma-separated coefficients a,b,c,d,e,f
    #[arg(long, value_name = "A,B,C,D,E,F")]
    pub crs_transform: Option<String>,

    /// Pixel size in CRS units
    #[arg(long)]
    pub scale: Option<f64>,

    /// Output shape in pixels
    #[arg(long, value_name = "ROWSxCOLS")]
    pub shape: Option<String>,

    /// Region of interest in the target CRS
    #[arg(long, value_name = "LEFT,BOTTOM,RIGHT,TOP")]
    pub region: Option<String>,

    /// Output pixel type (uint8, int16, float32, ...); inferred when omitted
    #[arg(long)]
    pub dtype: Option<String>,

    /// Resampling method: nearest, bilinear or bicubic
    #[arg(long, default_value = "nearest")]
    pub resampling: String,

    /// Apply band scale/offset factors server-side
    #[arg(long)]
    pub scale_offset: bool,
}

impl GeometryArgs {
    pub fn to_options(&self) -> Result<ExportOptions, CliError> {
        Ok(ExportOptions {
            crs: self.crs.clone(),
            crs_transform: self
                .crs_transform
                .as_deref()
                .map(parse_transform)
                .transpose()?,
            scale: self.scale,
            shape: self.shape.as_deref().map(parse_shape).transpose()?,
            region: self.region.as_deref().map(parse_region).transpose()?,
            dtype: self.dtype.as_deref().map(parse_dtype).transpose()?,
            resampling: self.resampling.parse().map_err(CliError::Args)?,
            scale_offset: self.scale_offset,
        })
    }
}

/// Connection settings for the remote image service.
#[derive(Args, Debug)]
pub struct ServiceArgs {
    /// Image service base URL
    #[arg(long, env = "TERRAPULL_SERVICE_URL")]
    pub service_url: String,

    /// Retry attempts per request after the first
    #[arg(long)]
    pub retries: Option<u32>,

    /// Exponential backoff factor in seconds
    #[arg(long)]
    pub backoff: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl ServiceArgs {
    pub fn retry_config(&self) -> RetryConfig {
        let mut config = RetryConfig::default();
        if let Some(retries) = self.retries {
            config = config.with_retries(retries);
        }
        if let Some(backoff) = self.backoff {
            config = config.with_backoff_factor(backoff);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(Duration::from_secs(timeout));
        }
        config
    }

    fn client(&self) -> Result<RetryingClient, CliError> {
        let retry = self.retry_config();
        let transport = ReqwestClient::new(retry.timeout)?;
        Ok(RetryingClient::new(Box::new(transport), retry))
    }

    /// A retrying client for raw tile payload downloads.
    pub fn tile_client(&self) -> Result<Arc<RetryingClient>, CliError> {
        Ok(Arc::new(self.client()?))
    }

    /// A handle to `id` on the configured service.
    pub fn image(&self, id: &str) -> Result<Arc<RestImage>, CliError> {
        let service = RestImageService::new(self.client()?, self.service_url.clone());
        Ok(Arc::new(service.image(id)))
    }
}

fn parse_floats(text: &str, expected: usize, what: &str) -> Result<Vec<f64>, CliError> {
    let values: Result<Vec<f64>, _> = text.split(',').map(|v| v.trim().parse()).collect();
    let values = values.map_err(|_| {
        CliError::Args(format!("{} must be {} comma-separated numbers", what, expected))
    })?;
    if values.len() != expected {
        return Err(CliError::Args(format!(
            "{} needs {} values, got {}",
            what,
            expected,
            values.len()
        )));
    }
    Ok(values)
}

fn parse_transform(text: &str) -> Result<Affine, CliError> {
    let v = parse_floats(text, 6, "--crs-transform")?;
    Ok(Affine::new(v[0], v[1], v[2], v[3], v[4], v[5]))
}

fn parse_region(text: &str) -> Result<Bounds, CliError> {
    let v = parse_floats(text, 4, "--region")?;
    Ok(Bounds::new(v[0], v[1], v[2], v[3]))
}

fn parse_shape(text: &str) -> Result<Shape, CliError> {
    let parse = |part: Option<&str>| part.and_then(|p| p.trim().parse::<usize>().ok());
    let mut parts = text.split(['x', 'X']);
    match (parse(parts.next()), parse(parts.next()), parts.next()) {
        (Some(rows), Some(cols), None) => Ok(Shape::new(rows, cols)),
        _ => Err(CliError::Args(format!(
            "--shape must look like ROWSxCOLS, got '{}'",
            text
        ))),
    }
}

fn parse_dtype(text: &str) -> Result<Dtype, CliError> {
    Dtype::from_name(text)
        .ok_or_else(|| CliError::Args(format!("unknown dtype '{}'", text)))
}

/// Terminal progress bar fed by the download orchestrator.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn on_plan(&self, total_tiles: usize) {
        self.bar.set_length(total_tiles as u64);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }

    fn on_tile_done(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }

    fn on_finalized(&self, _path: &Path) {
        self.bar.finish_and_clear();
    }
}
