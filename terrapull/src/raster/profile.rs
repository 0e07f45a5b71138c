//! Output raster profile and pixel type inference.
//!
//! The profile is derived once from a resolved export spec and the remote
//! numeric-range metadata, and stays immutable for the life of a download
//! job. Pixel type inference maps per-band `{precision, min, max}` ranges to
//! the smallest [`Dtype`] that can carry every band.

use serde::Deserialize;
use thiserror::Error;

use crate::export::ExportSpec;
use crate::geom::{Affine, Shape};
use crate::raster::Dtype;

/// Numeric precision of a band as reported by the remote service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Int,
    Float,
    Double,
}

impl Precision {
    pub fn is_float(&self) -> bool {
        matches!(self, Precision::Float | Precision::Double)
    }
}

/// The numeric range metadata of one band.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct BandRange {
    pub precision: Precision,
    pub min: f64,
    pub max: f64,
}

impl BandRange {
    pub fn int(min: f64, max: f64) -> Self {
        Self {
            precision: Precision::Int,
            min,
            max,
        }
    }

    pub fn float(min: f64, max: f64) -> Self {
        Self {
            precision: Precision::Float,
            min,
            max,
        }
    }
}

/// Errors building a raster profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The band ranges cannot map to any supported pixel type.
    #[error("unsupported pixel type: {0}")]
    UnsupportedDtype(String),
}

/// Largest integer magnitude exactly representable in an f32.
const F32_EXACT_INT: f64 = 16_777_216.0; // 2^24

/// Smallest integer dtype whose representable range covers `[min, max]`.
fn integer_dtype(min: f64, max: f64) -> Option<Dtype> {
    debug_assert!(min <= max);
    if min >= 0.0 {
        if max <= u8::MAX as f64 {
            Some(Dtype::U8)
        } else if max <= u16::MAX as f64 {
            Some(Dtype::U16)
        } else if max <= u32::MAX as f64 {
            Some(Dtype::U32)
        } else if max <= u64::MAX as f64 {
            Some(Dtype::U64)
        } else {
            None
        }
    } else if min >= i8::MIN as f64 && max <= i8::MAX as f64 {
        Some(Dtype::I8)
    } else if min >= i16::MIN as f64 && max <= i16::MAX as f64 {
        Some(Dtype::I16)
    } else if min >= i32::MIN as f64 && max <= i32::MAX as f64 {
        Some(Dtype::I32)
    } else if min >= i64::MIN as f64 && max <= i64::MAX as f64 {
        Some(Dtype::I64)
    } else {
        None
    }
}

/// Infers the single output pixel type for a set of band ranges.
///
/// Integer-only inputs resolve to the smallest signed/unsigned integer type
/// covering the combined range. Any floating-point band, or an integer mix
/// that no single integer type covers, promotes the output to the smallest
/// common float: `F32` when every range is exactly representable in single
/// precision, `F64` otherwise.
pub fn infer_dtype(ranges: &[BandRange]) -> Result<Dtype, ProfileError> {
    if ranges.is_empty() {
        return Err(ProfileError::UnsupportedDtype(
            "image has no bands".to_string(),
        ));
    }
    for range in ranges {
        if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
            return Err(ProfileError::UnsupportedDtype(format!(
                "invalid band range [{}, {}]",
                range.min, range.max
            )));
        }
    }

    let any_float = ranges.iter().any(|r| r.precision.is_float());

    if !any_float {
        let min = ranges.iter().map(|r| r.min).fold(f64::INFINITY, f64::min);
        let max = ranges
            .iter()
            .map(|r| r.max)
            .fold(f64::NEG_INFINITY, f64::max);
        if let Some(dtype) = integer_dtype(min, max) {
            return Ok(dtype);
        }
        // irreconcilable integer mix (e.g. u64-sized range with negatives)
    }

    // Float path: F32 only when every range survives single precision.
    let fits_f32 = ranges.iter().all(|r| {
        let limit = match r.precision {
            Precision::Int => F32_EXACT_INT,
            Precision::Float | Precision::Double => f32::MAX as f64,
        };
        r.min.abs() <= limit && r.max.abs() <= limit
    });
    Ok(if fits_f32 { Dtype::F32 } else { Dtype::F64 })
}

/// The nodata value for a pixel type: 0 for unsigned integers, the most
/// negative representable value for signed integers, NaN for floats.
pub fn nodata_for(dtype: Dtype) -> f64 {
    match dtype {
        Dtype::U8 | Dtype::U16 | Dtype::U32 | Dtype::U64 => 0.0,
        Dtype::I8 => i8::MIN as f64,
        Dtype::I16 => i16::MIN as f64,
        Dtype::I32 => i32::MIN as f64,
        Dtype::I64 => i64::MIN as f64,
        Dtype::F32 | Dtype::F64 => f64::NAN,
    }
}

/// Output compression scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Deflate,
    None,
}

/// Band layout of the output raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interleave {
    /// One plane per band (TIFF planar configuration 2).
    #[default]
    Band,
    /// Samples interleaved per pixel.
    Pixel,
}

/// The on-disk description of the raster one download job produces.
///
/// Built once up front and immutable afterwards; workers share it read-only.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterProfile {
    pub crs: String,
    pub transform: Affine,
    pub shape: Shape,
    pub count: usize,
    pub dtype: Dtype,
    pub nodata: f64,
    pub compression: Compression,
    pub interleave: Interleave,
    /// Internal tiling block edge, in pixels.
    pub block_size: usize,
    pub build_overviews: bool,
}

impl RasterProfile {
    /// Builds the profile for a resolved export spec.
    pub fn from_export(spec: &ExportSpec) -> Self {
        Self {
            crs: spec.crs.clone(),
            transform: spec.transform,
            shape: spec.shape,
            count: spec.count,
            dtype: spec.dtype,
            nodata: nodata_for(spec.dtype),
            compression: Compression::Deflate,
            interleave: Interleave::Band,
            block_size: super::DEFAULT_BLOCK_SIZE,
            build_overviews: true,
        }
    }

    pub fn width(&self) -> usize {
        self.shape.cols
    }

    pub fn height(&self) -> usize {
        self.shape.rows
    }

    /// Total uncompressed raster size in bytes.
    pub fn byte_size(&self) -> u64 {
        self.shape.num_pixels() * self.count as u64 * self.dtype.byte_width() as u64
    }
}
