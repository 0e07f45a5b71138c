//! Tile planning.
//!
//! The remote service caps each request by payload size and edge length, so
//! the output raster is split into a grid of same-shape tiles that
//! individually satisfy both limits while staying close to the raster's own
//! aspect ratio. [`plan_tile_shape`] picks the tile shape; [`TileGrid`]
//! enumerates the tiles row-major, clipping the last row/column at the
//! raster boundary, so the windows partition the raster exactly.

use thiserror::Error;
use tracing::debug;

use crate::geom::{Affine, Shape, Window};
use crate::raster::Dtype;

/// Default per-request payload cap, 32 MiB.
pub const DEFAULT_MAX_TILE_BYTES: u64 = 32 * 1024 * 1024;

/// Default per-request edge cap in pixels.
pub const DEFAULT_MAX_TILE_DIM: usize = 10_000;

/// Remote request limits. Configuration inputs with the service's documented
/// defaults, not hardcoded constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileLimits {
    pub max_tile_bytes: u64,
    pub max_tile_dim: usize,
}

impl Default for TileLimits {
    fn default() -> Self {
        Self {
            max_tile_bytes: DEFAULT_MAX_TILE_BYTES,
            max_tile_dim: DEFAULT_MAX_TILE_DIM,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("cannot tile an empty raster (shape {0})")]
    EmptyShape(Shape),

    #[error("tile limits must be positive")]
    InvalidLimits,

    #[error("a single pixel ({0} bytes across bands) exceeds the tile byte limit")]
    PixelTooLarge(u64),
}

/// One fetch-and-write unit: a window of the output raster and the transform
/// mapping that window's pixels to CRS coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub index: usize,
    pub window: Window,
    pub transform: Affine,
}

impl Tile {
    pub fn shape(&self) -> Shape {
        self.window.shape()
    }
}

/// Picks the uniform tile shape for a raster of `shape` with `count` bands
/// of `dtype` under `limits`.
///
/// A raster that already satisfies both limits is a single tile. Otherwise
/// the tile count starts at `ceil(bytes / max_tile_bytes)`, is bumped past
/// primes so a non-trivial 2-D factorization exists, and the factor pair
/// closest to the raster's aspect ratio splits the shape. Clipping to
/// `max_tile_dim` or ceil rounding can leave the candidate over the byte
/// limit, in which case the count is raised until the bound holds; the bound
/// is a guarantee, not an estimate.
pub fn plan_tile_shape(
    shape: Shape,
    count: usize,
    dtype: Dtype,
    limits: &TileLimits,
) -> Result<Shape, PlanError> {
    if shape.is_empty() {
        return Err(PlanError::EmptyShape(shape));
    }
    if count == 0 || limits.max_tile_bytes == 0 || limits.max_tile_dim == 0 {
        return Err(PlanError::InvalidLimits);
    }
    let pixel_bytes = count as u64 * dtype.byte_width() as u64;
    if pixel_bytes > limits.max_tile_bytes {
        return Err(PlanError::PixelTooLarge(pixel_bytes));
    }

    let image_bytes = shape.num_pixels() * pixel_bytes;
    if image_bytes <= limits.max_tile_bytes
        && shape.rows <= limits.max_tile_dim
        && shape.cols <= limits.max_tile_dim
    {
        return Ok(shape);
    }

    let aspect = shape.rows as f64 / shape.cols as f64;
    let mut num_tiles = image_bytes.div_ceil(limits.max_tile_bytes).max(1);
    loop {
        let n = if is_prime(num_tiles) && num_tiles > 1 {
            num_tiles + 1
        } else {
            num_tiles
        };
        let (a, b) = best_factor_pair(n, aspect);
        let tile = Shape::new(
            shape.rows.div_ceil(a as usize).min(limits.max_tile_dim),
            shape.cols.div_ceil(b as usize).min(limits.max_tile_dim),
        );
        if tile.num_pixels() * pixel_bytes <= limits.max_tile_bytes {
            debug!(
                tiles = n,
                grid = %format_args!("{}x{}", a, b),
                tile_shape = %tile,
                "planned tile grid"
            );
            return Ok(tile);
        }
        num_tiles = n + 1;
    }
}

/// The factor pair `(a, b)` of `n` whose ratio `a/b` is closest to `aspect`.
/// Ties go to the smaller `a`, so the choice is deterministic.
fn best_factor_pair(n: u64, aspect: f64) -> (u64, u64) {
    let mut best = (1, n);
    let mut best_distance = f64::INFINITY;
    for a in 1..=n {
        if n % a != 0 {
            continue;
        }
        let b = n / a;
        let distance = (a as f64 / b as f64 - aspect).abs();
        if distance < best_distance {
            best = (a, b);
            best_distance = distance;
        }
    }
    best
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// Row-major enumeration of the tiles covering `shape`. Finite; each tile is
/// yielded exactly once.
#[derive(Debug)]
pub struct TileGrid {
    shape: Shape,
    tile_shape: Shape,
    base: Affine,
    row_off: usize,
    col_off: usize,
    index: usize,
}

impl TileGrid {
    pub fn new(shape: Shape, tile_shape: Shape, base: Affine) -> Self {
        Self {
            shape,
            tile_shape,
            base,
            row_off: 0,
            col_off: 0,
            index: 0,
        }
    }

    /// Number of tiles the grid will yield in total.
    pub fn tile_count(&self) -> usize {
        if self.shape.is_empty() || self.tile_shape.is_empty() {
            return 0;
        }
        self.shape.rows.div_ceil(self.tile_shape.rows)
            * self.shape.cols.div_ceil(self.tile_shape.cols)
    }
}

impl Iterator for TileGrid {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.shape.is_empty() || self.tile_shape.is_empty() || self.row_off >= self.shape.rows {
            return None;
        }
        // clip at the raster boundary
        let height = self.tile_shape.rows.min(self.shape.rows - self.row_off);
        let width = self.tile_shape.cols.min(self.shape.cols - self.col_off);
        let window = Window::new(self.row_off, self.col_off, height, width);
        let tile = Tile {
            index: self.index,
            window,
            transform: self
                .base
                .translated(self.col_off as f64, self.row_off as f64),
        };
        self.index += 1;
        self.col_off += self.tile_shape.cols;
        if self.col_off >= self.shape.cols {
            self.col_off = 0;
            self.row_off += self.tile_shape.rows;
        }
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.tile_count().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileGrid {}
