//! The in-memory output raster a download job assembles tiles into.
//!
//! Tiles land in disjoint windows, so writes are order-independent; the job
//! wraps the mosaic in a single mutex because the buffer itself is not safe
//! for unsynchronized concurrent writes. The output file is only created in
//! [`Mosaic::write_geotiff`], after every tile has been written, so a failed
//! job never leaves a file claiming to be complete.

use std::path::Path;

use thiserror::Error;

use crate::geom::{Shape, Window};
use crate::raster::geotiff::{self, GeoTiffMetadata, GeoTiffWriteError};
use crate::raster::{DtypeMismatch, PixelData, RasterProfile};

/// A decoded tile: `count` bands of `shape` pixels, band-sequential.
#[derive(Clone, Debug)]
pub struct TileArray {
    pub count: usize,
    pub shape: Shape,
    pub data: PixelData,
}

impl TileArray {
    /// Wraps a pixel buffer, checking that its length matches the shape.
    pub fn new(count: usize, shape: Shape, data: PixelData) -> Result<Self, MosaicError> {
        let expected = count * shape.rows * shape.cols;
        if data.len() != expected {
            return Err(MosaicError::BufferLength {
                expected,
                found: data.len(),
            });
        }
        Ok(Self { count, shape, data })
    }
}

/// Errors writing tile data into the mosaic.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error(transparent)]
    Dtype(#[from] DtypeMismatch),

    #[error("band count mismatch: mosaic has {expected}, tile has {found}")]
    BandCount { expected: usize, found: usize },

    #[error("window {window} does not fit raster shape {shape}")]
    WindowOutOfBounds { window: Window, shape: Shape },

    #[error("tile shape {found} does not match window shape {expected}")]
    TileShape { expected: Shape, found: Shape },

    #[error("pixel buffer length mismatch: expected {expected} samples, found {found}")]
    BufferLength { expected: usize, found: usize },
}

/// The assembled output raster.
pub struct Mosaic {
    profile: RasterProfile,
    data: PixelData,
}

impl Mosaic {
    /// Allocates a mosaic filled with the profile's nodata value.
    pub fn new(profile: RasterProfile) -> Self {
        let len = profile.count * profile.shape.rows * profile.shape.cols;
        let data = PixelData::filled(profile.dtype, len, profile.nodata);
        Self { profile, data }
    }

    pub fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    /// Writes a tile into its window of the mosaic.
    ///
    /// The caller guarantees windows are disjoint; this method only checks
    /// that the write stays in bounds and the buffer types line up.
    pub fn write_window(&mut self, window: Window, tile: &TileArray) -> Result<(), MosaicError> {
        let shape = self.profile.shape;
        if tile.count != self.profile.count {
            return Err(MosaicError::BandCount {
                expected: self.profile.count,
                found: tile.count,
            });
        }
        if !window.fits_within(shape) {
            return Err(MosaicError::WindowOutOfBounds { window, shape });
        }
        if tile.shape != window.shape() {
            return Err(MosaicError::TileShape {
                expected: window.shape(),
                found: tile.shape,
            });
        }

        let plane = shape.rows * shape.cols;
        let tile_plane = window.height * window.width;
        for band in 0..self.profile.count {
            for r in 0..window.height {
                let dst = band * plane + (window.row_off + r) * shape.cols + window.col_off;
                let src = band * tile_plane + r * window.width;
                self.data.copy_from(dst, &tile.data, src, window.width)?;
            }
        }
        Ok(())
    }

    /// Encodes the mosaic to a GeoTIFF file.
    pub fn write_geotiff(
        &self,
        path: &Path,
        metadata: &GeoTiffMetadata,
    ) -> Result<(), GeoTiffWriteError> {
        geotiff::write_geotiff(path, &self.profile, &self.data, metadata)
    }
}
