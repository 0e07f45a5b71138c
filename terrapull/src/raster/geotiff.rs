//! GeoTIFF encoder for the assembled mosaic.
//!
//! Writes a tiled, DEFLATE-compressed, band-interleaved GeoTIFF using the
//! pure-Rust `tiff` crate's low-level directory API, with georeferencing
//! carried in GeoTIFF tags (ModelPixelScale/ModelTiepoint for rectilinear
//! transforms, ModelTransformation otherwise, plus a GeoKey directory),
//! GDAL-compatible nodata and metadata tags, and power-of-two reduced
//! overview IFDs appended after the full-resolution image.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use thiserror::Error;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::debug;

use crate::geom::{parse_epsg, Affine};
use crate::raster::{Compression, PixelData, RasterProfile};

/// Default internal tile (block) edge in pixels.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

// GeoTIFF tag IDs not named by the tiff crate
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GEO_ASCII_PARAMS: u16 = 34737;

// GDAL-specific tags
const TAG_GDAL_METADATA: u16 = 42112;
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const KEY_GT_MODEL_TYPE: u16 = 1024;
const KEY_GT_RASTER_TYPE: u16 = 1025;
const KEY_GT_CITATION: u16 = 1026;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Per-band descriptive metadata attached to the finished file.
#[derive(Clone, Debug, Default)]
pub struct TiffBandMeta {
    pub name: String,
    pub description: Option<String>,
    /// Ground sample distance in metres.
    pub gsd: Option<f64>,
}

/// Top-level descriptive metadata attached to the finished file.
#[derive(Clone, Debug, Default)]
pub struct GeoTiffMetadata {
    /// Provenance of the composite/source image.
    pub source_id: Option<String>,
    pub license: Option<String>,
    pub bands: Vec<TiffBandMeta>,
}

/// Errors encoding the output GeoTIFF.
#[derive(Debug, Error)]
pub enum GeoTiffWriteError {
    #[error("failed to write output raster: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF encoding failed: {0}")]
    Encode(#[from] tiff::TiffError),

    #[error("invalid raster profile: {0}")]
    InvalidProfile(String),
}

/// Encodes `data` (band-sequential, matching `profile`) to `path`.
pub fn write_geotiff(
    path: &Path,
    profile: &RasterProfile,
    data: &PixelData,
    metadata: &GeoTiffMetadata,
) -> Result<(), GeoTiffWriteError> {
    let shape = profile.shape;
    if shape.is_empty() || profile.count == 0 {
        return Err(GeoTiffWriteError::InvalidProfile(format!(
            "empty raster: shape {}, {} band(s)",
            shape, profile.count
        )));
    }
    if data.dtype() != profile.dtype {
        return Err(GeoTiffWriteError::InvalidProfile(format!(
            "pixel buffer is {} but profile expects {}",
            data.dtype(),
            profile.dtype
        )));
    }
    let expected = profile.count * shape.rows * shape.cols;
    if data.len() != expected {
        return Err(GeoTiffWriteError::InvalidProfile(format!(
            "pixel buffer has {} samples, profile expects {}",
            data.len(),
            expected
        )));
    }
    // TIFF requires tile edges to be multiples of 16
    if profile.block_size == 0 || profile.block_size % 16 != 0 {
        return Err(GeoTiffWriteError::InvalidProfile(format!(
            "block size {} is not a positive multiple of 16",
            profile.block_size
        )));
    }

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;

    write_level(
        &mut encoder,
        profile,
        data,
        shape.rows,
        shape.cols,
        Some(metadata),
    )?;

    if profile.build_overviews {
        let mut factor = 2usize;
        loop {
            let rows = shape.rows.div_ceil(factor);
            let cols = shape.cols.div_ceil(factor);
            // stop once the previous level fits a single block
            if shape.rows.div_ceil(factor / 2) <= profile.block_size
                && shape.cols.div_ceil(factor / 2) <= profile.block_size
            {
                break;
            }
            debug!(factor, rows, cols, "writing overview level");
            let (reduced, out_rows, out_cols) =
                data.downsample(profile.count, shape.rows, shape.cols, factor);
            debug_assert_eq!((out_rows, out_cols), (rows, cols));
            write_level(&mut encoder, profile, &reduced, rows, cols, None)?;
            factor *= 2;
        }
    }

    Ok(())
}

/// Writes one IFD: the full-resolution image when `metadata` is given, a
/// reduced overview otherwise.
fn write_level<W: Write + Seek, K: TiffKind>(
    encoder: &mut TiffEncoder<W, K>,
    profile: &RasterProfile,
    data: &PixelData,
    rows: usize,
    cols: usize,
    metadata: Option<&GeoTiffMetadata>,
) -> Result<(), GeoTiffWriteError> {
    let count = profile.count;
    let block = profile.block_size;
    let mut dir = encoder.new_directory()?;

    if metadata.is_none() {
        // reduced-resolution subfile
        dir.write_tag(Tag::NewSubfileType, 1u32)?;
    }

    dir.write_tag(Tag::ImageWidth, cols as u32)?;
    dir.write_tag(Tag::ImageLength, rows as u32)?;
    dir.write_tag(Tag::BitsPerSample, vec![profile.dtype.bits(); count].as_slice())?;
    let compression_tag: u16 = match profile.compression {
        Compression::Deflate => 8,
        Compression::None => 1,
    };
    dir.write_tag(Tag::Compression, compression_tag)?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, count as u16)?;
    dir.write_tag(
        Tag::SampleFormat,
        vec![profile.dtype.sample_format(); count].as_slice(),
    )?;
    if count > 1 {
        // band interleave: one plane of tiles per band
        dir.write_tag(Tag::PlanarConfiguration, 2u16)?;
        dir.write_tag(Tag::ExtraSamples, vec![0u16; count - 1].as_slice())?;
    } else {
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    }
    dir.write_tag(Tag::TileWidth, block as u32)?;
    dir.write_tag(Tag::TileLength, block as u32)?;

    // nodata element bytes used to pad edge blocks
    let pad = PixelData::filled(profile.dtype, 1, profile.nodata);
    let mut pad_bytes = Vec::with_capacity(profile.dtype.byte_width());
    pad.push_le_bytes(0, &mut pad_bytes);

    let blocks_down = rows.div_ceil(block);
    let blocks_across = cols.div_ceil(block);
    let mut offsets: Vec<u32> = Vec::with_capacity(count * blocks_down * blocks_across);
    let mut counts: Vec<u32> = Vec::with_capacity(offsets.capacity());

    for band in 0..count {
        let plane = band * rows * cols;
        for block_row in 0..blocks_down {
            for block_col in 0..blocks_across {
                let raw = extract_block(
                    data, plane, rows, cols, block, block_row, block_col, &pad_bytes,
                );
                let encoded = match profile.compression {
                    Compression::Deflate => deflate(&raw)?,
                    Compression::None => raw,
                };
                let offset = dir.write_data(encoded.as_slice())?;
                offsets.push(offset as u32);
                counts.push(encoded.len() as u32);
            }
        }
    }
    dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
    dir.write_tag(Tag::TileByteCounts, counts.as_slice())?;

    if let Some(metadata) = metadata {
        write_geo_tags(&mut dir, &profile.crs, &profile.transform)?;
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), nodata_string(profile).as_str())?;
        let xml = gdal_metadata_xml(metadata);
        if !xml.is_empty() {
            dir.write_tag(Tag::Unknown(TAG_GDAL_METADATA), xml.as_str())?;
        }
    }

    dir.finish()?;
    Ok(())
}

/// Extracts one `block`×`block` tile of a band plane, little-endian, padding
/// past the raster edge with the nodata element.
#[allow(clippy::too_many_arguments)]
fn extract_block(
    data: &PixelData,
    plane: usize,
    rows: usize,
    cols: usize,
    block: usize,
    block_row: usize,
    block_col: usize,
    pad_bytes: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(block * block * pad_bytes.len());
    for r in 0..block {
        let src_row = block_row * block + r;
        for c in 0..block {
            let src_col = block_col * block + c;
            if src_row < rows && src_col < cols {
                data.push_le_bytes(plane + src_row * cols + src_col, &mut out);
            } else {
                out.extend_from_slice(pad_bytes);
            }
        }
    }
    out
}

fn deflate(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(raw.len() / 2),
        flate2::Compression::default(),
    );
    encoder.write_all(raw)?;
    encoder.finish()
}

/// The GDAL_NODATA tag payload.
fn nodata_string(profile: &RasterProfile) -> String {
    if profile.dtype.is_float() && profile.nodata.is_nan() {
        "nan".to_string()
    } else if profile.dtype.is_float() {
        format!("{}", profile.nodata)
    } else {
        format!("{}", profile.nodata as i64)
    }
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    crs: &str,
    transform: &Affine,
) -> Result<(), GeoTiffWriteError> {
    if transform.is_rectilinear() {
        let pixel_scale = [transform.a, -transform.e, 0.0];
        dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), pixel_scale.as_slice())?;
        let tiepoint = [0.0, 0.0, 0.0, transform.c, transform.f, 0.0];
        dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), tiepoint.as_slice())?;
    } else {
        // rotated grids need the full 4x4 model transformation
        let t = transform;
        let model: [f64; 16] = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::Unknown(TAG_MODEL_TRANSFORMATION), model.as_slice())?;
    }

    let geographic = crate::geom::is_geographic(crs);
    let mut keys: Vec<u16> = vec![1, 1, 0, 0];
    let mut num_keys = 0u16;

    keys.extend_from_slice(&[
        KEY_GT_MODEL_TYPE,
        0,
        1,
        if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    num_keys += 1;
    keys.extend_from_slice(&[KEY_GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
    num_keys += 1;

    let mut ascii_params = String::new();
    match parse_epsg(crs) {
        Some(code) => {
            let key = if geographic {
                KEY_GEOGRAPHIC_TYPE
            } else {
                KEY_PROJECTED_CS_TYPE
            };
            keys.extend_from_slice(&[key, 0, 1, code as u16]);
            num_keys += 1;
        }
        None => {
            // non-EPSG identifier: carry it as a citation string
            ascii_params = format!("{}|", crs);
            keys.extend_from_slice(&[
                KEY_GT_CITATION,
                TAG_GEO_ASCII_PARAMS,
                ascii_params.len() as u16,
                0,
            ]);
            num_keys += 1;
        }
    }
    keys[3] = num_keys;

    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), keys.as_slice())?;
    if !ascii_params.is_empty() {
        dir.write_tag(Tag::Unknown(TAG_GEO_ASCII_PARAMS), ascii_params.as_str())?;
    }
    Ok(())
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Builds the GDAL_METADATA XML document carrying provenance, license and
/// per-band descriptive items.
fn gdal_metadata_xml(metadata: &GeoTiffMetadata) -> String {
    let mut items = String::new();
    if let Some(id) = &metadata.source_id {
        items.push_str(&format!(
            "  <Item name=\"SOURCE_ID\">{}</Item>\n",
            xml_escape(id)
        ));
    }
    if let Some(license) = &metadata.license {
        items.push_str(&format!(
            "  <Item name=\"LICENSE\">{}</Item>\n",
            xml_escape(license)
        ));
    }
    for (i, band) in metadata.bands.iter().enumerate() {
        items.push_str(&format!(
            "  <Item name=\"DESCRIPTION\" sample=\"{}\" role=\"description\">{}</Item>\n",
            i,
            xml_escape(&band.name)
        ));
        if let Some(description) = &band.description {
            items.push_str(&format!(
                "  <Item name=\"ABSTRACT\" sample=\"{}\">{}</Item>\n",
                i,
                xml_escape(description)
            ));
        }
        if let Some(gsd) = band.gsd {
            items.push_str(&format!(
                "  <Item name=\"GSD\" sample=\"{}\">{}</Item>\n",
                i, gsd
            ));
        }
    }
    if items.is_empty() {
        String::new()
    } else {
        format!("<GDALMetadata>\n{}</GDALMetadata>\n", items)
    }
}
