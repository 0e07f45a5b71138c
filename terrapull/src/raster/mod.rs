//! Raster pixel types and buffers.
//!
//! [`Dtype`] enumerates the pixel types the output raster can carry, and
//! [`PixelData`] is the matching typed buffer, stored band-sequentially
//! (all of band 0, then all of band 1, ...). The mosaic, the GeoTIFF writer
//! and the tile decoder all share these types.

mod geotiff;
mod mosaic;
mod profile;

pub use geotiff::{GeoTiffMetadata, GeoTiffWriteError, TiffBandMeta, DEFAULT_BLOCK_SIZE};
pub use mosaic::{Mosaic, MosaicError, TileArray};
pub use profile::{
    infer_dtype, nodata_for, BandRange, Compression, Interleave, Precision, ProfileError,
    RasterProfile,
};

use std::fmt;

/// Supported pixel types for the output raster.
///
/// Mirrors the numpy/rasterio naming (`uint8` ... `float64`) used by the
/// remote service's numeric metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Dtype {
    /// Width of one pixel sample in bytes.
    pub fn byte_width(&self) -> usize {
        match self {
            Dtype::U8 | Dtype::I8 => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
            Dtype::U64 | Dtype::I64 | Dtype::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Dtype::F32 | Dtype::F64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Dtype::I8 | Dtype::I16 | Dtype::I32 | Dtype::I64 | Dtype::F32 | Dtype::F64
        )
    }

    /// The rasterio-style name, e.g. `uint16`.
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::U8 => "uint8",
            Dtype::I8 => "int8",
            Dtype::U16 => "uint16",
            Dtype::I16 => "int16",
            Dtype::U32 => "uint32",
            Dtype::I32 => "int32",
            Dtype::U64 => "uint64",
            Dtype::I64 => "int64",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "uint8" => Dtype::U8,
            "int8" => Dtype::I8,
            "uint16" => Dtype::U16,
            "int16" => Dtype::I16,
            "uint32" => Dtype::U32,
            "int32" => Dtype::I32,
            "uint64" => Dtype::U64,
            "int64" => Dtype::I64,
            "float32" => Dtype::F32,
            "float64" => Dtype::F64,
            _ => return None,
        })
    }

    /// TIFF SampleFormat tag value (1 = unsigned, 2 = signed, 3 = IEEE float).
    pub fn sample_format(&self) -> u16 {
        match self {
            Dtype::U8 | Dtype::U16 | Dtype::U32 | Dtype::U64 => 1,
            Dtype::I8 | Dtype::I16 | Dtype::I32 | Dtype::I64 => 2,
            Dtype::F32 | Dtype::F64 => 3,
        }
    }

    /// TIFF BitsPerSample tag value.
    pub fn bits(&self) -> u16 {
        (self.byte_width() * 8) as u16
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed, band-sequential pixel buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_plane {
    ($self:expr, |$v:ident| $body:expr) => {
        match $self {
            PixelData::U8($v) => $body,
            PixelData::I8($v) => $body,
            PixelData::U16($v) => $body,
            PixelData::I16($v) => $body,
            PixelData::U32($v) => $body,
            PixelData::I32($v) => $body,
            PixelData::U64($v) => $body,
            PixelData::I64($v) => $body,
            PixelData::F32($v) => $body,
            PixelData::F64($v) => $body,
        }
    };
}

impl PixelData {
    /// Allocates a buffer of `len` samples filled with `fill` (cast to the
    /// target type with `as`-semantics; NaN survives for float types).
    pub fn filled(dtype: Dtype, len: usize, fill: f64) -> Self {
        match dtype {
            Dtype::U8 => PixelData::U8(vec![fill as u8; len]),
            Dtype::I8 => PixelData::I8(vec![fill as i8; len]),
            Dtype::U16 => PixelData::U16(vec![fill as u16; len]),
            Dtype::I16 => PixelData::I16(vec![fill as i16; len]),
            Dtype::U32 => PixelData::U32(vec![fill as u32; len]),
            Dtype::I32 => PixelData::I32(vec![fill as i32; len]),
            Dtype::U64 => PixelData::U64(vec![fill as u64; len]),
            Dtype::I64 => PixelData::I64(vec![fill as i64; len]),
            Dtype::F32 => PixelData::F32(vec![fill as f32; len]),
            Dtype::F64 => PixelData::F64(vec![fill; len]),
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            PixelData::U8(_) => Dtype::U8,
            PixelData::I8(_) => Dtype::I8,
            PixelData::U16(_) => Dtype::U16,
            PixelData::I16(_) => Dtype::I16,
            PixelData::U32(_) => Dtype::U32,
            PixelData::I32(_) => Dtype::I32,
            PixelData::U64(_) => Dtype::U64,
            PixelData::I64(_) => Dtype::I64,
            PixelData::F32(_) => Dtype::F32,
            PixelData::F64(_) => Dtype::F64,
        }
    }

    /// Number of samples in the buffer.
    pub fn len(&self) -> usize {
        for_each_plane!(self, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads sample `i`, widened to `f64`. Mainly for tests and overviews.
    pub fn get(&self, i: usize) -> f64 {
        for_each_plane!(self, |v| v[i] as f64)
    }

    /// Copies `len` samples from `src[src_start..]` into `self[dst_start..]`.
    ///
    /// Both buffers must hold the same dtype.
    pub fn copy_from(
        &mut self,
        dst_start: usize,
        src: &PixelData,
        src_start: usize,
        len: usize,
    ) -> Result<(), DtypeMismatch> {
        macro_rules! copy_rows {
            ($($var:ident),*) => {
                match (self, src) {
                    $(
                        (PixelData::$var(d), PixelData::$var(s)) => {
                            d[dst_start..dst_start + len]
                                .copy_from_slice(&s[src_start..src_start + len]);
                            Ok(())
                        }
                    )*
                    (d, s) => Err(DtypeMismatch {
                        expected: d.dtype(),
                        found: s.dtype(),
                    }),
                }
            };
        }
        copy_rows!(U8, I8, U16, I16, U32, I32, U64, I64, F32, F64)
    }

    /// Appends the little-endian bytes of sample `i` to `out`.
    pub fn push_le_bytes(&self, i: usize, out: &mut Vec<u8>) {
        for_each_plane!(self, |v| out.extend_from_slice(&v[i].to_le_bytes()));
    }

    /// Nearest-neighbour downsample of a `(count, rows, cols)` buffer by an
    /// integer `factor`, used when building overview levels.
    pub fn downsample(
        &self,
        count: usize,
        rows: usize,
        cols: usize,
        factor: usize,
    ) -> (Self, usize, usize) {
        let out_rows = (rows + factor - 1) / factor;
        let out_cols = (cols + factor - 1) / factor;

        macro_rules! sample {
            ($($var:ident),*) => {
                match self {
                    $(
                        PixelData::$var(v) => {
                            let mut out =
                                Vec::with_capacity(count * out_rows * out_cols);
                            for band in 0..count {
                                let plane = band * rows * cols;
                                for r in 0..out_rows {
                                    let src_row = (r * factor).min(rows - 1);
                                    for c in 0..out_cols {
                                        let src_col = (c * factor).min(cols - 1);
                                        out.push(v[plane + src_row * cols + src_col]);
                                    }
                                }
                            }
                            PixelData::$var(out)
                        }
                    )*
                }
            };
        }
        let data = sample!(U8, I8, U16, I16, U32, I32, U64, I64, F32, F64);
        (data, out_rows, out_cols)
    }
}

/// Two pixel buffers with different dtypes met where one was expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pixel dtype mismatch: expected {expected}, found {found}")]
pub struct DtypeMismatch {
    pub expected: Dtype,
    pub found: Dtype,
}
