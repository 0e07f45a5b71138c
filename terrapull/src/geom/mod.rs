//! Geometric primitives for raster export.
//!
//! This module provides the small value types the rest of the crate is built
//! on: the 6-parameter [`Affine`] pixel-to-CRS transform, raster [`Shape`],
//! pixel [`Window`]s and coordinate [`Bounds`], plus a couple of CRS string
//! helpers.
//!
//! All types are `Copy` value objects with bit-exact equality; the export
//! resolver relies on this to stay deterministic.

use std::fmt;
use std::ops::Mul;

use serde::{Deserialize, Serialize};

/// A 6-parameter affine transform mapping pixel `(col, row)` to CRS `(x, y)`.
///
/// Uses the rasterio/GDAL coefficient convention:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// For a north-up raster `a` is the pixel width, `e` the (negative) pixel
/// height, and `(c, f)` the coordinates of the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Creates a transform from the six coefficients in row-major order.
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Creates a transform from a `[a, b, c, d, e, f]` coefficient array.
    pub fn from_coefficients(coeffs: [f64; 6]) -> Self {
        Self::new(coeffs[0], coeffs[1], coeffs[2], coeffs[3], coeffs[4], coeffs[5])
    }

    /// A pure translation by `(tx, ty)` in pixel units.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, tx, 0.0, 1.0, ty)
    }

    /// The north-up transform for a pixel grid anchored at `(left, top)`
    /// with the given pixel size.
    pub fn north_up(left: f64, top: f64, pixel_size: f64) -> Self {
        Self::new(pixel_size, 0.0, left, 0.0, -pixel_size, top)
    }

    /// Returns the coefficients as `[a, b, c, d, e, f]`.
    pub fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// Maps a pixel coordinate to CRS coordinates.
    pub fn transform(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Returns this transform translated by `(col_off, row_off)` pixels.
    ///
    /// This is the per-tile transform: the tile's pixel `(0, 0)` maps to the
    /// same CRS coordinate as the parent's `(col_off, row_off)`.
    pub fn translated(&self, col_off: f64, row_off: f64) -> Self {
        *self * Self::translation(col_off, row_off)
    }

    /// True when the transform has no rotation/shear terms.
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// The absolute pixel width, i.e. the scale along the x axis.
    pub fn scale_x(&self) -> f64 {
        (self.a * self.a + self.d * self.d).sqrt()
    }

    /// The absolute pixel height.
    pub fn scale_y(&self) -> f64 {
        (self.b * self.b + self.e * self.e).sqrt()
    }
}

impl From<[f64; 6]> for Affine {
    fn from(coeffs: [f64; 6]) -> Self {
        Self::from_coefficients(coeffs)
    }
}

impl From<Affine> for [f64; 6] {
    fn from(transform: Affine) -> Self {
        transform.coefficients()
    }
}

impl Mul for Affine {
    type Output = Affine;

    /// Composes two transforms: `(self * rhs)` applies `rhs` first.
    fn mul(self, rhs: Affine) -> Affine {
        Affine::new(
            self.a * rhs.a + self.b * rhs.d,
            self.a * rhs.b + self.b * rhs.e,
            self.a * rhs.c + self.b * rhs.f + self.c,
            self.d * rhs.a + self.e * rhs.d,
            self.d * rhs.b + self.e * rhs.e,
            self.d * rhs.c + self.e * rhs.f + self.f,
        )
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "|{} {} {}|{} {} {}|",
            self.a, self.b, self.c, self.d, self.e, self.f
        )
    }
}

/// Raster dimensions in pixels, `(rows, cols)` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Total pixel count.
    pub fn num_pixels(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// A rectangular pixel window within a raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub height: usize,
    pub width: usize,
}

impl Window {
    pub fn new(row_off: usize, col_off: usize, height: usize, width: usize) -> Self {
        Self {
            row_off,
            col_off,
            height,
            width,
        }
    }

    pub fn shape(&self) -> Shape {
        Shape::new(self.height, self.width)
    }

    /// Exclusive end row.
    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    /// Exclusive end column.
    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    /// True when the window lies entirely inside a raster of `shape`.
    pub fn fits_within(&self, shape: Shape) -> bool {
        self.row_end() <= shape.rows && self.col_end() <= shape.cols
    }

    /// True when the two windows share at least one pixel.
    pub fn intersects(&self, other: &Window) -> bool {
        self.row_off < other.row_end()
            && other.row_off < self.row_end()
            && self.col_off < other.col_end()
            && other.col_off < self.col_end()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}]",
            self.row_off,
            self.row_end(),
            self.col_off,
            self.col_end()
        )
    }
}

/// Axis-aligned bounds in CRS coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn is_valid(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }
}

/// Parses the numeric code out of an `EPSG:nnnn` identifier.
pub fn parse_epsg(crs: &str) -> Option<u32> {
    let rest = crs.strip_prefix("EPSG:").or_else(|| crs.strip_prefix("epsg:"))?;
    rest.parse().ok()
}

/// Geographic (degree-unit) EPSG codes we recognise.
///
/// Full CRS parsing is out of scope; this covers the geodetic CRSs the
/// remote service actually hands out.
const GEOGRAPHIC_EPSG: &[u32] = &[4326, 4269, 4267, 4258, 4979];

/// True when the CRS identifier names a geographic (degree-unit) CRS.
pub fn is_geographic(crs: &str) -> bool {
    match parse_epsg(crs) {
        Some(code) => GEOGRAPHIC_EPSG.contains(&code),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_identity_maps_pixels_unchanged() {
        let t = Affine::identity();
        assert_eq!(t.transform(3.0, 7.0), (3.0, 7.0));
    }

    #[test]
    fn test_affine_north_up() {
        let t = Affine::north_up(100.0, 500.0, 10.0);
        assert_eq!(t.transform(0.0, 0.0), (100.0, 500.0));
        // one pixel right and down
        assert_eq!(t.transform(1.0, 1.0), (110.0, 490.0));
    }

    #[test]
    fn test_affine_translated_matches_manual_offset() {
        let base = Affine::north_up(0.0, 0.0, 30.0);
        let tile = base.translated(4.0, 2.0);
        // tile origin maps to the parent's pixel (4, 2)
        assert_eq!(tile.transform(0.0, 0.0), base.transform(4.0, 2.0));
        assert_eq!(tile.transform(1.0, 1.0), base.transform(5.0, 3.0));
    }

    #[test]
    fn test_affine_composition_order() {
        let scale = Affine::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0);
        let shift = Affine::translation(1.0, 1.0);
        // scale * shift applies the shift first
        assert_eq!((scale * shift).transform(0.0, 0.0), (2.0, 2.0));
        assert_eq!((shift * scale).transform(0.0, 0.0), (1.0, 1.0));
    }

    #[test]
    fn test_affine_rectilinear() {
        assert!(Affine::north_up(0.0, 0.0, 1.0).is_rectilinear());
        assert!(!Affine::new(1.0, 0.5, 0.0, 0.0, 1.0, 0.0).is_rectilinear());
    }

    #[test]
    fn test_affine_coefficients_round_trip() {
        let coeffs = [10.0, 0.0, 300.0, 0.0, -10.0, 800.0];
        assert_eq!(Affine::from_coefficients(coeffs).coefficients(), coeffs);
    }

    #[test]
    fn test_window_fits_and_intersects() {
        let shape = Shape::new(100, 200);
        let w = Window::new(90, 190, 10, 10);
        assert!(w.fits_within(shape));
        assert!(!Window::new(90, 190, 11, 10).fits_within(shape));

        let a = Window::new(0, 0, 10, 10);
        let b = Window::new(9, 9, 10, 10);
        let c = Window::new(10, 10, 10, 10);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_parse_epsg() {
        assert_eq!(parse_epsg("EPSG:32634"), Some(32634));
        assert_eq!(parse_epsg("epsg:4326"), Some(4326));
        assert_eq!(parse_epsg("WGS84"), None);
    }

    #[test]
    fn test_is_geographic() {
        assert!(is_geographic("EPSG:4326"));
        assert!(!is_geographic("EPSG:32634"));
        assert!(!is_geographic("not-a-crs"));
    }
}
