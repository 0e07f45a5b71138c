//! Export specification resolution.
//!
//! [`resolve`] turns a source image's reported geometry plus user overrides
//! into one fully-determined [`ExportSpec`]: CRS, pixel-to-CRS transform,
//! pixel shape, dtype and band count. Everything downstream (tile planning,
//! fetching, the output profile) consumes the spec and never looks back at
//! the raw options, so all under-determined inputs are rejected here, before
//! any network traffic.
//!
//! Resolution is pure: the same source and options always produce a
//! bit-identical spec.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::geom::{is_geographic, Affine, Shape};
use crate::provider::ImageInfo;
use crate::raster::{infer_dtype, BandRange, Dtype, ProfileError};

// ============================================================================
// Options and spec
// ============================================================================

/// Resampling method applied server-side when regridding a fixed-grid source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Bicubic,
}

impl Resampling {
    pub fn name(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
            Resampling::Bicubic => "bicubic",
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resampling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            "bicubic" => Ok(Resampling::Bicubic),
            other => Err(format!("unknown resampling method '{}'", other)),
        }
    }
}

/// User overrides for an export. All fields optional; unset fields fall back
/// to the source image's native values where those exist.
#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    pub crs: Option<String>,
    pub crs_transform: Option<Affine>,
    /// Pixel size in CRS units.
    pub scale: Option<f64>,
    pub shape: Option<Shape>,
    pub region: Option<crate::geom::Bounds>,
    pub dtype: Option<Dtype>,
    pub resampling: Resampling,
    /// Apply the bands' scale/offset factors server-side.
    pub scale_offset: bool,
}

/// A fully-determined description of the raster to produce.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportSpec {
    pub crs: String,
    pub transform: Affine,
    pub shape: Shape,
    pub dtype: Dtype,
    pub count: usize,
    pub resampling: Resampling,
    pub scale_offset: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Ways resolution can fail. All of these are reported before any network
/// activity starts.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The options do not pin down an export geometry.
    #[error("export is not fully defined: {0}")]
    UnboundedExport(String),

    /// The image has no finite footprint and nothing bounds it.
    #[error("image is unbounded: {0}")]
    UnboundedImage(String),

    /// Geographic target CRS needs an explicit degree scale.
    #[error("cannot infer a scale in degrees for geographic CRS '{0}'; pass an explicit scale")]
    AmbiguousScale(String),

    /// Non-nearest resampling needs a defined source grid.
    #[error("resampling '{0}' requires a source with a fixed projection")]
    Resampling(Resampling),

    #[error(transparent)]
    Dtype(#[from] ProfileError),

    #[error("invalid export option: {0}")]
    InvalidOption(String),
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolves `source` + `opts` into an [`ExportSpec`], or explains why the
/// combination is under-determined.
pub fn resolve(source: &ImageInfo, opts: &ExportOptions) -> Result<ExportSpec, ResolveError> {
    validate_options(opts)?;

    if source.bands.is_empty() {
        return Err(ResolveError::InvalidOption(format!(
            "image '{}' has no bands",
            source.id
        )));
    }

    let fixed = source.has_fixed_projection();

    if !fixed {
        if opts.resampling != Resampling::Nearest {
            return Err(ResolveError::Resampling(opts.resampling));
        }
        if opts.crs.is_none() {
            return Err(ResolveError::UnboundedExport(format!(
                "image '{}' has no fixed projection; a target CRS is required",
                source.id
            )));
        }
        if opts.crs_transform.is_none() && opts.scale.is_none() && opts.shape.is_none() {
            return Err(ResolveError::UnboundedExport(format!(
                "image '{}' has no fixed projection; a scale, shape or transform is required",
                source.id
            )));
        }
    }

    let crs = match (&opts.crs, &source.crs) {
        (Some(crs), _) => crs.clone(),
        (None, Some(crs)) => crs.clone(),
        (None, None) => {
            return Err(ResolveError::UnboundedExport(format!(
                "image '{}' reports no CRS",
                source.id
            )))
        }
    };

    let (transform, shape) = resolve_geometry(source, opts, &crs, fixed)?;
    if shape.is_empty() {
        return Err(ResolveError::InvalidOption(format!(
            "resolved shape {} is empty",
            shape
        )));
    }

    let dtype = match opts.dtype {
        Some(dtype) => dtype,
        None => {
            let ranges: Vec<BandRange> = source.bands.iter().map(|b| b.data_type).collect();
            infer_dtype(&ranges)?
        }
    };

    debug!(
        image = %source.id,
        %crs,
        shape = %shape,
        dtype = %dtype,
        "resolved export spec"
    );

    Ok(ExportSpec {
        crs,
        transform,
        shape,
        dtype,
        count: source.bands.len(),
        resampling: opts.resampling,
        scale_offset: opts.scale_offset,
    })
}

fn validate_options(opts: &ExportOptions) -> Result<(), ResolveError> {
    if let Some(scale) = opts.scale {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ResolveError::InvalidOption(format!(
                "scale must be a positive number, got {}",
                scale
            )));
        }
    }
    if let Some(shape) = opts.shape {
        if shape.is_empty() {
            return Err(ResolveError::InvalidOption(format!(
                "shape {} is empty",
                shape
            )));
        }
    }
    if let Some(region) = opts.region {
        if !region.is_valid() {
            return Err(ResolveError::InvalidOption(
                "region has zero or negative extent".to_string(),
            ));
        }
    }
    Ok(())
}

fn resolve_geometry(
    source: &ImageInfo,
    opts: &ExportOptions,
    crs: &str,
    fixed: bool,
) -> Result<(Affine, Shape), ResolveError> {
    // An explicit transform plus shape fully determines the geometry.
    if let (Some(transform), Some(shape)) = (opts.crs_transform, opts.shape) {
        return Ok((transform, shape));
    }

    // Nothing overrides geometry: export the source's exact native grid.
    let native_crs = opts
        .crs
        .as_deref()
        .map_or(true, |c| Some(c) == source.crs.as_deref());
    if fixed
        && native_crs
        && opts.crs_transform.is_none()
        && opts.shape.is_none()
        && opts.region.is_none()
        && opts.scale.is_none()
    {
        if let (Some(transform), Some(shape)) = (source.transform, source.shape) {
            return Ok((transform, shape));
        }
    }

    // Everything else rasterizes a region.
    let region = opts.region.or(source.footprint).ok_or_else(|| {
        ResolveError::UnboundedImage(format!(
            "image '{}' has no footprint and no region was given",
            source.id
        ))
    })?;

    if let Some(shape) = opts.shape {
        // region + shape: pixel sizes follow from the extents
        let pixel_w = region.width() / shape.cols as f64;
        let pixel_h = region.height() / shape.rows as f64;
        let transform = Affine::new(pixel_w, 0.0, region.left, 0.0, -pixel_h, region.top);
        return Ok((transform, shape));
    }

    if let Some(given) = opts.crs_transform {
        // region + transform: keep the pixel sizes, anchor at the region
        if !given.is_rectilinear() {
            return Err(ResolveError::InvalidOption(
                "a rotated crs_transform requires an explicit shape".to_string(),
            ));
        }
        let pixel_w = given.a;
        let pixel_h = -given.e;
        if pixel_w <= 0.0 || pixel_h <= 0.0 {
            return Err(ResolveError::InvalidOption(
                "crs_transform must have positive x scale and negative y scale".to_string(),
            ));
        }
        let cols = (region.width() / pixel_w).ceil() as usize;
        let rows = (region.height() / pixel_h).ceil() as usize;
        let transform = Affine::new(pixel_w, 0.0, region.left, 0.0, given.e, region.top);
        return Ok((transform, Shape::new(rows, cols)));
    }

    // region + scale
    if is_geographic(crs) && opts.scale.is_none() {
        return Err(ResolveError::AmbiguousScale(crs.to_string()));
    }
    let scale = match opts.scale {
        Some(scale) => scale,
        // native pixel size in the source CRS
        None => match source.transform {
            Some(transform) if native_crs => transform.scale_x(),
            _ => {
                return Err(ResolveError::UnboundedExport(
                    "no scale given and none can be taken from the source".to_string(),
                ))
            }
        },
    };
    let cols = (region.width() / scale).ceil() as usize;
    let rows = (region.height() / scale).ceil() as usize;
    Ok((
        Affine::north_up(region.left, region.top, scale),
        Shape::new(rows, cols),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Bounds;
    use crate::provider::BandInfo;

    fn fixed_source() -> ImageInfo {
        ImageInfo {
            id: "COLLECTION/IMG_001".to_string(),
            crs: Some("EPSG:32634".to_string()),
            transform: Some(Affine::north_up(500_000.0, 7_200_000.0, 10.0)),
            shape: Some(Shape::new(1024, 768)),
            footprint: Some(Bounds::new(500_000.0, 7_189_760.0, 507_680.0, 7_200_000.0)),
            license: Some("CC-BY-4.0".to_string()),
            bands: vec![band("B2"), band("B3")],
        }
    }

    fn composite_source() -> ImageInfo {
        ImageInfo {
            id: "composite".to_string(),
            crs: None,
            transform: None,
            shape: None,
            footprint: None,
            license: None,
            bands: vec![band("B2")],
        }
    }

    fn band(name: &str) -> BandInfo {
        BandInfo {
            name: name.to_string(),
            data_type: BandRange::int(0.0, 10_000.0),
            gsd: Some(10.0),
            description: None,
        }
    }

    #[test]
    fn test_native_grid_when_nothing_overrides() {
        let source = fixed_source();
        let spec = resolve(&source, &ExportOptions::default()).unwrap();
        assert_eq!(spec.crs, "EPSG:32634");
        assert_eq!(Some(spec.transform), source.transform);
        assert_eq!(Some(spec.shape), source.shape);
        assert_eq!(spec.count, 2);
        assert_eq!(spec.dtype, Dtype::U16);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let source = fixed_source();
        let opts = ExportOptions {
            scale: Some(20.0),
            region: Some(Bounds::new(500_000.0, 7_199_000.0, 501_000.0, 7_200_000.0)),
            ..Default::default()
        };
        let first = resolve(&source, &opts).unwrap();
        let second = resolve(&source, &opts).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_transform_and_shape_fully_determine() {
        let source = composite_source();
        let transform = Affine::north_up(0.0, 100.0, 1.0);
        let opts = ExportOptions {
            crs: Some("EPSG:3857".to_string()),
            crs_transform: Some(transform),
            shape: Some(Shape::new(50, 60)),
            ..Default::default()
        };
        let spec = resolve(&source, &opts).unwrap();
        assert_eq!(spec.transform, transform);
        assert_eq!(spec.shape, Shape::new(50, 60));
    }

    #[test]
    fn test_region_and_scale_rasterize() {
        let source = fixed_source();
        let opts = ExportOptions {
            scale: Some(30.0),
            region: Some(Bounds::new(500_000.0, 7_199_100.0, 500_910.0, 7_200_000.0)),
            ..Default::default()
        };
        let spec = resolve(&source, &opts).unwrap();
        // 910m / 30m and 900m / 30m, ceil
        assert_eq!(spec.shape, Shape::new(30, 31));
        assert_eq!(spec.transform, Affine::north_up(500_000.0, 7_200_000.0, 30.0));
    }

    #[test]
    fn test_region_and_shape_derive_pixel_sizes() {
        let source = composite_source();
        let opts = ExportOptions {
            crs: Some("EPSG:3857".to_string()),
            shape: Some(Shape::new(100, 200)),
            region: Some(Bounds::new(0.0, 0.0, 400.0, 100.0)),
            ..Default::default()
        };
        let spec = resolve(&source, &opts).unwrap();
        assert_eq!(spec.transform.a, 2.0);
        assert_eq!(spec.transform.e, -1.0);
        assert_eq!(spec.transform.c, 0.0);
        assert_eq!(spec.transform.f, 100.0);
    }

    #[test]
    fn test_composite_without_geometry_is_unbounded_export() {
        let err = resolve(&composite_source(), &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ResolveError::UnboundedExport(_)));
    }

    #[test]
    fn test_composite_with_crs_but_no_scale_or_shape() {
        let opts = ExportOptions {
            crs: Some("EPSG:3857".to_string()),
            region: Some(Bounds::new(0.0, 0.0, 1.0, 1.0)),
            ..Default::default()
        };
        let err = resolve(&composite_source(), &opts).unwrap_err();
        assert!(matches!(err, ResolveError::UnboundedExport(_)));
    }

    #[test]
    fn test_footprintless_image_needs_region() {
        let opts = ExportOptions {
            crs: Some("EPSG:3857".to_string()),
            scale: Some(10.0),
            ..Default::default()
        };
        let err = resolve(&composite_source(), &opts).unwrap_err();
        assert!(matches!(err, ResolveError::UnboundedImage(_)));
    }

    #[test]
    fn test_geographic_crs_requires_explicit_scale() {
        let source = fixed_source();
        let opts = ExportOptions {
            crs: Some("EPSG:4326".to_string()),
            region: Some(Bounds::new(18.0, 69.0, 19.0, 70.0)),
            ..Default::default()
        };
        let err = resolve(&source, &opts).unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousScale(_)));

        let opts = ExportOptions {
            scale: Some(0.001),
            ..opts
        };
        let spec = resolve(&source, &opts).unwrap();
        assert_eq!(spec.shape, Shape::new(1000, 1000));
    }

    #[test]
    fn test_resampling_needs_fixed_grid() {
        let opts = ExportOptions {
            crs: Some("EPSG:3857".to_string()),
            scale: Some(10.0),
            region: Some(Bounds::new(0.0, 0.0, 100.0, 100.0)),
            resampling: Resampling::Bilinear,
            ..Default::default()
        };
        let err = resolve(&composite_source(), &opts).unwrap_err();
        assert!(matches!(err, ResolveError::Resampling(Resampling::Bilinear)));
        // same options resolve fine against a fixed-grid source
        resolve(&fixed_source(), &opts).unwrap();
    }

    #[test]
    fn test_explicit_dtype_wins_over_inference() {
        let source = fixed_source();
        let opts = ExportOptions {
            dtype: Some(Dtype::F64),
            ..Default::default()
        };
        let spec = resolve(&source, &opts).unwrap();
        assert_eq!(spec.dtype, Dtype::F64);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let opts = ExportOptions {
            scale: Some(-5.0),
            ..Default::default()
        };
        let err = resolve(&fixed_source(), &opts).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidOption(_)));
    }

    #[test]
    fn test_resampling_parse_round_trip() {
        for method in [Resampling::Nearest, Resampling::Bilinear, Resampling::Bicubic] {
            assert_eq!(method.name().parse::<Resampling>().unwrap(), method);
        }
        assert!("cubic-spline".parse::<Resampling>().is_err());
    }
}
