//! Capture compositing
//!
//! Blends a captured photo with the matching crop of the reference image
//! into the tile artifact that gets persisted. A tile is the photo at full
//! opacity with the cell's reference crop drawn over it at 50%, stretched to
//! a fixed square size so every cell of the mosaic stays uniform.

use image::{imageops, ImageOutputFormat, RgbImage};
use std::io::Cursor;

use crate::error::MosaicError;
use crate::grid::{cell_rect, Cell, Grid};

/// JPEG quality of stored tiles.
const TILE_JPEG_QUALITY: u8 = 80;

/// Blend weight of the reference crop drawn over the captured photo.
const REFERENCE_BLEND: f32 = 0.5;

/// Decode an image buffer into an RGB raster.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, MosaicError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(MosaicError::ImageDecode)
}

/// Encode an RGB raster as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, MosaicError> {
    let mut jpeg = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(quality))
        .map_err(MosaicError::ImageEncode)?;
    Ok(jpeg)
}

/// Blend `src` over `dest` in place at the given opacity. Both images must
/// have identical dimensions.
pub fn blend_over(dest: &mut RgbImage, src: &RgbImage, alpha: f32) {
    debug_assert_eq!(dest.dimensions(), src.dimensions());
    let alpha = alpha.clamp(0.0, 1.0);
    for (d, s) in dest.pixels_mut().zip(src.pixels()) {
        for c in 0..3 {
            d.0[c] = (d.0[c] as f32 * (1.0 - alpha) + s.0[c] as f32 * alpha).round() as u8;
        }
    }
}

/// Produce the stored tile image for a capture assigned to `cell`.
///
/// The photo and the reference crop are both stretched to
/// `tile_size x tile_size` without preserving aspect ratio. A photo or
/// reference that fails to decode is a hard error; no tile bytes are
/// produced. Deterministic for identical inputs.
pub fn compose_tile(
    photo_jpeg: &[u8],
    cell: Cell,
    grid: Grid,
    reference: &RgbImage,
    tile_size: u32,
) -> Result<Vec<u8>, MosaicError> {
    let photo = decode_rgb(photo_jpeg)?;
    let mut out = imageops::resize(&photo, tile_size, tile_size, imageops::FilterType::Triangle);

    let rect = cell_rect(cell, grid, reference.width(), reference.height());
    let crop = imageops::crop_imm(reference, rect.x, rect.y, rect.w, rect.h).to_image();
    let crop = imageops::resize(&crop, tile_size, tile_size, imageops::FilterType::Triangle);

    blend_over(&mut out, &crop, REFERENCE_BLEND);

    encode_jpeg(&out, TILE_JPEG_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn flat(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(rgb))
    }

    fn flat_jpeg(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        encode_jpeg(&flat(w, h, rgb), 95).unwrap()
    }

    #[test]
    fn test_output_is_fixed_size() {
        let grid = Grid::new(5, 8).unwrap();
        let reference = flat(400, 250, [0, 0, 200]);
        // Non-square photo still yields a square tile.
        let photo = flat_jpeg(320, 240, [200, 0, 0]);

        let tile = compose_tile(&photo, Cell::new(2, 3), grid, &reference, 64).unwrap();
        let decoded = decode_rgb(&tile).unwrap();
        assert_eq!(decoded.dimensions(), (64, 64));
    }

    #[test]
    fn test_blend_is_half_reference() {
        let grid = Grid::new(2, 2).unwrap();
        let reference = flat(100, 100, [0, 0, 200]);
        let photo = flat_jpeg(80, 80, [200, 0, 0]);

        let tile = compose_tile(&photo, Cell::new(0, 0), grid, &reference, 32).unwrap();
        let decoded = decode_rgb(&tile).unwrap();
        let p = decoded.get_pixel(16, 16);

        // 50/50 blend of (200,0,0) and (0,0,200), within JPEG tolerance.
        assert!((p.0[0] as i32 - 100).abs() <= 8, "r = {}", p.0[0]);
        assert!(p.0[1] < 16, "g = {}", p.0[1]);
        assert!((p.0[2] as i32 - 100).abs() <= 8, "b = {}", p.0[2]);
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let grid = Grid::new(5, 8).unwrap();
        let reference = flat(400, 250, [10, 120, 60]);
        let photo = flat_jpeg(300, 300, [240, 200, 40]);

        let a = compose_tile(&photo, Cell::new(4, 7), grid, &reference, 48).unwrap();
        let b = compose_tile(&photo, Cell::new(4, 7), grid, &reference, 48).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_corrupt_photo_is_fatal() {
        let grid = Grid::new(5, 8).unwrap();
        let reference = flat(400, 250, [0, 0, 0]);

        let result = compose_tile(b"not a jpeg", Cell::new(0, 0), grid, &reference, 32);
        assert!(matches!(result, Err(MosaicError::ImageDecode(_))));
    }

    #[test]
    fn test_blend_over_weights() {
        let mut dest = flat(4, 4, [100, 100, 100]);
        let src = flat(4, 4, [200, 0, 100]);
        blend_over(&mut dest, &src, 0.4);
        let p = dest.get_pixel(0, 0);
        assert_eq!(p.0, [140, 60, 100]);
    }
}
