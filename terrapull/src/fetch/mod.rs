//! Tile retrieval and decoding.
//!
//! For one planned tile, [`TileFetcher`] asks the remote image for a
//! download URL matching the tile's exact CRS, transform and pixel window,
//! pulls the compressed container through the retrying client, unpacks its
//! single GeoTIFF entry and decodes it into a band-sequential [`TileArray`].
//! Retries happen inside the HTTP layer; every failure that escapes it is
//! tagged with the tile it belongs to.

use std::io::{Cursor, Read};
use std::sync::Arc;

use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::debug;

use crate::geom::Shape;
use crate::provider::{DownloadRequest, ProviderError, RemoteImage, RetryingClient};
use crate::raster::{Dtype, PixelData, TileArray};
use crate::tiler::Tile;

/// A tile that could not be retrieved or decoded, by index and window.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("tile {index} ({window}): {source}")]
    Provider {
        index: usize,
        window: String,
        #[source]
        source: ProviderError,
    },

    #[error("tile {index} ({window}): bad container: {message}")]
    Container {
        index: usize,
        window: String,
        message: String,
    },

    #[error("tile {index} ({window}): bad payload: {message}")]
    Decode {
        index: usize,
        window: String,
        message: String,
    },
}

impl FetchError {
    /// Index of the tile that failed.
    pub fn tile_index(&self) -> usize {
        match self {
            FetchError::Provider { index, .. }
            | FetchError::Container { index, .. }
            | FetchError::Decode { index, .. } => *index,
        }
    }
}

/// Fetches tiles of one export from one remote image.
pub struct TileFetcher {
    image: Arc<dyn RemoteImage>,
    client: Arc<RetryingClient>,
    crs: String,
    dtype: Dtype,
    count: usize,
}

impl TileFetcher {
    pub fn new(
        image: Arc<dyn RemoteImage>,
        client: Arc<RetryingClient>,
        crs: impl Into<String>,
        dtype: Dtype,
        count: usize,
    ) -> Self {
        Self {
            image,
            client,
            crs: crs.into(),
            dtype,
            count,
        }
    }

    /// Retrieves and decodes one tile. Blocks for the duration of the
    /// request including internal retries.
    pub fn fetch(&self, tile: &Tile) -> Result<TileArray, FetchError> {
        let request =
            DownloadRequest::geotiff(&self.crs, tile.transform, tile.shape(), self.dtype.name());
        let url = self
            .image
            .download_url(&request)
            .map_err(|e| self.provider_error(tile, e))?;
        debug!(tile = tile.index, %url, "fetching tile");
        let container = self
            .client
            .get(&url)
            .map_err(|e| self.provider_error(tile, e))?;
        let payload = unpack_single_entry(&container)
            .map_err(|message| self.container_error(tile, message))?;
        let array = decode_geotiff(&payload, tile.shape(), self.count, self.dtype)
            .map_err(|message| self.decode_error(tile, message))?;
        Ok(array)
    }

    fn provider_error(&self, tile: &Tile, source: ProviderError) -> FetchError {
        FetchError::Provider {
            index: tile.index,
            window: tile.window.to_string(),
            source,
        }
    }

    fn container_error(&self, tile: &Tile, message: String) -> FetchError {
        FetchError::Container {
            index: tile.index,
            window: tile.window.to_string(),
            message,
        }
    }

    fn decode_error(&self, tile: &Tile, message: String) -> FetchError {
        FetchError::Decode {
            index: tile.index,
            window: tile.window.to_string(),
            message,
        }
    }
}

/// Extracts the single raster file from a zip container.
pub fn unpack_single_entry(container: &[u8]) -> Result<Vec<u8>, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(container))
        .map_err(|e| format!("not a zip archive: {}", e))?;
    if archive.is_empty() {
        return Err("zip archive is empty".to_string());
    }
    if archive.len() > 1 {
        return Err(format!(
            "expected a single-file container, found {} entries",
            archive.len()
        ));
    }
    let mut entry = archive
        .by_index(0)
        .map_err(|e| format!("unreadable zip entry: {}", e))?;
    let mut payload = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut payload)
        .map_err(|e| format!("failed to decompress entry: {}", e))?;
    Ok(payload)
}

/// Decodes a GeoTIFF payload into a band-sequential array of the expected
/// shape, band count and dtype. Pixel-interleaved payloads are
/// de-interleaved.
pub fn decode_geotiff(
    payload: &[u8],
    shape: Shape,
    count: usize,
    dtype: Dtype,
) -> Result<TileArray, String> {
    let mut decoder =
        Decoder::new(Cursor::new(payload)).map_err(|e| format!("not a TIFF: {}", e))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| format!("missing dimensions: {}", e))?;
    if (height as usize, width as usize) != (shape.rows, shape.cols) {
        return Err(format!(
            "payload is {}x{}, expected {}",
            height, width, shape
        ));
    }
    let result = decoder
        .read_image()
        .map_err(|e| format!("decode failed: {}", e))?;
    let chunky = pixel_data_from(result, dtype)?;
    let pixels = shape.rows * shape.cols;
    if chunky.len() != pixels * count {
        return Err(format!(
            "payload has {} samples, expected {} ({} band(s) of {})",
            chunky.len(),
            pixels * count,
            count,
            shape
        ));
    }
    let planar = deinterleave(chunky, pixels, count);
    TileArray::new(count, shape, planar).map_err(|e| e.to_string())
}

fn pixel_data_from(result: DecodingResult, dtype: Dtype) -> Result<PixelData, String> {
    let data = match result {
        DecodingResult::U8(v) => PixelData::U8(v),
        DecodingResult::I8(v) => PixelData::I8(v),
        DecodingResult::U16(v) => PixelData::U16(v),
        DecodingResult::I16(v) => PixelData::I16(v),
        DecodingResult::U32(v) => PixelData::U32(v),
        DecodingResult::I32(v) => PixelData::I32(v),
        DecodingResult::U64(v) => PixelData::U64(v),
        DecodingResult::I64(v) => PixelData::I64(v),
        DecodingResult::F32(v) => PixelData::F32(v),
        DecodingResult::F64(v) => PixelData::F64(v),
    };
    if data.dtype() != dtype {
        return Err(format!(
            "payload is {}, expected {}",
            data.dtype(),
            dtype
        ));
    }
    Ok(data)
}

/// Converts pixel-interleaved samples to one plane per band. Single-band
/// data passes through untouched.
fn deinterleave(chunky: PixelData, pixels: usize, count: usize) -> PixelData {
    if count <= 1 {
        return chunky;
    }

    fn rearrange<T: Copy + Default>(input: &[T], pixels: usize, count: usize) -> Vec<T> {
        let mut out = vec![T::default(); input.len()];
        for p in 0..pixels {
            for b in 0..count {
                out[b * pixels + p] = input[p * count + b];
            }
        }
        out
    }

    match chunky {
        PixelData::U8(v) => PixelData::U8(rearrange(&v, pixels, count)),
        PixelData::I8(v) => PixelData::I8(rearrange(&v, pixels, count)),
        PixelData::U16(v) => PixelData::U16(rearrange(&v, pixels, count)),
        PixelData::I16(v) => PixelData::I16(rearrange(&v, pixels, count)),
        PixelData::U32(v) => PixelData::U32(rearrange(&v, pixels, count)),
        PixelData::I32(v) => PixelData::I32(rearrange(&v, pixels, count)),
        PixelData::U64(v) => PixelData::U64(rearrange(&v, pixels, count)),
        PixelData::I64(v) => PixelData::I64(rearrange(&v, pixels, count)),
        PixelData::F32(v) => PixelData::F32(rearrange(&v, pixels, count)),
        PixelData::F64(v) => PixelData::F64(rearrange(&v, pixels, count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tiff::encoder::{colortype, TiffEncoder};
    use zip::write::SimpleFileOptions;

    /// A chunky RGB8 GeoTIFF wrapped in a single-entry zip, the shape of a
    /// real tile payload.
    fn rgb_payload(rows: usize, cols: usize) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(rows * cols * 3);
        for _ in 0..rows * cols {
            pixels.extend_from_slice(&[1u8, 2, 3]);
        }
        let mut tif = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut tif).unwrap();
            encoder
                .write_image::<colortype::RGB8>(cols as u32, rows as u32, &pixels)
                .unwrap();
        }

        let mut container = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut container);
            writer
                .start_file("tile.tif", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(&tif.into_inner()).unwrap();
            writer.finish().unwrap();
        }
        container.into_inner()
    }

    #[test]
    fn test_unpack_rejects_multi_entry_containers() {
        let mut container = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut container);
            writer.start_file("a.tif", SimpleFileOptions::default()).unwrap();
            writer.write_all(b"x").unwrap();
            writer.start_file("b.tif", SimpleFileOptions::default()).unwrap();
            writer.write_all(b"y").unwrap();
            writer.finish().unwrap();
        }
        let err = unpack_single_entry(&container.into_inner()).unwrap_err();
        assert!(err.contains("2 entries"));
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(unpack_single_entry(b"not a zip").is_err());
    }

    #[test]
    fn test_decode_deinterleaves_rgb_payload() {
        let container = rgb_payload(4, 5);
        let payload = unpack_single_entry(&container).unwrap();
        let array = decode_geotiff(&payload, Shape::new(4, 5), 3, Dtype::U8).unwrap();
        assert_eq!(array.count, 3);
        assert_eq!(array.shape, Shape::new(4, 5));
        // band-sequential: all of band 0 first
        for p in 0..20 {
            assert_eq!(array.data.get(p), 1.0);
            assert_eq!(array.data.get(20 + p), 2.0);
            assert_eq!(array.data.get(40 + p), 3.0);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let container = rgb_payload(4, 5);
        let payload = unpack_single_entry(&container).unwrap();
        let err = decode_geotiff(&payload, Shape::new(5, 4), 3, Dtype::U8).unwrap_err();
        assert!(err.contains("expected"));
    }

    #[test]
    fn test_decode_rejects_wrong_dtype() {
        let container = rgb_payload(2, 2);
        let payload = unpack_single_entry(&container).unwrap();
        let err = decode_geotiff(&payload, Shape::new(2, 2), 3, Dtype::U16).unwrap_err();
        assert!(err.contains("uint16"));
    }
}
