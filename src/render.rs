//! Live mosaic rendering
//!
//! Owns the display surface. Each sync tick the renderer is handed the
//! current tile snapshot; tiles it has not seen before are decoded (in
//! parallel) and fade in over a fixed number of discrete opacity steps,
//! while tiles already on the surface stay at full opacity. Every filled
//! cell gets the matching reference-image crop ghosted over it at 40% and
//! its label drawn bottom-right; empty cells show only the background.
//!
//! A stored tile that fails to decode becomes a flat gray placeholder so a
//! single bad image can never abort a render pass.

use anyhow::{anyhow, Result};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use rayon::prelude::*;
use rusttype::{Font, Scale};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::compose::decode_rgb;
use crate::grid::{cell_rect, centered_fit, CenteredFit, Grid};
use crate::store::TileRecord;

/// Opacity of the reference-image ghost over each filled cell.
const GHOST_ALPHA: f32 = 0.4;

/// Fill used when a stored tile fails to decode.
const PLACEHOLDER_GRAY: Rgb<u8> = Rgb([128, 128, 128]);

/// Surface background.
const BACKGROUND: Rgb<u8> = Rgb([16, 16, 20]);

const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SHADOW: Rgb<u8> = Rgb([0, 0, 0]);

const FONT_BYTES: &[u8] = include_bytes!("../static/fonts/DejaVuSans-Bold.ttf");

/// A tile prepared for drawing: photo and ghost pre-scaled to the cell size.
struct CachedTile {
    record: TileRecord,
    image: RgbImage,
    ghost: RgbImage,
    /// Completed fade steps, saturating at `fade_steps` (fully opaque).
    fade_step: u32,
}

pub struct MosaicRenderer {
    width: u32,
    height: u32,
    grid: Grid,
    fit: CenteredFit,
    fade_steps: u32,
    font: Font<'static>,
    tiles: HashMap<u64, CachedTile>,
}

impl MosaicRenderer {
    pub fn new(width: u32, height: u32, grid: Grid, fade_steps: u32) -> Result<Self> {
        let font = Font::try_from_bytes(FONT_BYTES)
            .ok_or_else(|| anyhow!("embedded label font failed to parse"))?;
        Ok(Self {
            width,
            height,
            grid,
            fit: centered_fit(width, height, grid),
            fade_steps: fade_steps.max(1),
            font,
            tiles: HashMap::new(),
        })
    }

    /// Reconcile the cache with the latest snapshot. `bytes` is the stored
    /// JPEG per record, `None` when the store could not produce it. New
    /// tiles start their fade at zero; records gone from the snapshot drop
    /// off the surface.
    pub fn sync_tiles(&mut self, snapshot: Vec<(TileRecord, Option<Vec<u8>>)>, reference: &RgbImage) {
        let cell_size = self.fit.cell_size;
        if cell_size == 0 {
            // Surface smaller than the grid; nothing can be drawn.
            self.tiles.clear();
            return;
        }

        let current: HashSet<u64> = snapshot.iter().map(|(r, _)| r.id).collect();
        self.tiles.retain(|id, _| current.contains(id));

        let grid = self.grid;
        let fresh: Vec<CachedTile> = snapshot
            .into_iter()
            .filter(|(r, _)| !self.tiles.contains_key(&r.id) && grid.contains(r.cell()))
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(record, bytes)| {
                let image = match bytes.as_deref().map(decode_rgb) {
                    Some(Ok(img)) => {
                        imageops::resize(&img, cell_size, cell_size, imageops::FilterType::Triangle)
                    }
                    Some(Err(e)) => {
                        warn!("Tile {} failed to decode, using placeholder: {}", record.id, e);
                        RgbImage::from_pixel(cell_size, cell_size, PLACEHOLDER_GRAY)
                    }
                    None => RgbImage::from_pixel(cell_size, cell_size, PLACEHOLDER_GRAY),
                };

                let r = cell_rect(record.cell(), grid, reference.width(), reference.height());
                let crop = imageops::crop_imm(reference, r.x, r.y, r.w, r.h).to_image();
                let ghost =
                    imageops::resize(&crop, cell_size, cell_size, imageops::FilterType::Triangle);

                CachedTile {
                    record,
                    image,
                    ghost,
                    fade_step: 0,
                }
            })
            .collect();

        if !fresh.is_empty() {
            debug!("{} new tiles entering the mosaic", fresh.len());
        }
        for tile in fresh {
            self.tiles.insert(tile.record.id, tile);
        }
    }

    /// Whether any tile still has fade steps left to render.
    pub fn fading(&self) -> bool {
        self.tiles.values().any(|t| t.fade_step < self.fade_steps)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Draw the full mosaic and advance every mid-fade tile by one step.
    /// The first frame after a tile appears draws it at `1/fade_steps`
    /// opacity; after `fade_steps` frames it is fully opaque.
    pub fn render_frame(&mut self) -> RgbImage {
        let mut surface = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let cell_size = self.fit.cell_size;
        if cell_size == 0 {
            return surface;
        }

        // Stable draw order; cells are disjoint so order only affects logs.
        let mut ids: Vec<u64> = self.tiles.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(tile) = self.tiles.get(&id) else { continue };
            let (x, y) = self.fit.cell_origin(tile.record.cell());
            let alpha = (tile.fade_step + 1).min(self.fade_steps) as f32 / self.fade_steps as f32;

            blend_rect(&mut surface, &tile.image, x, y, alpha);
            blend_rect(&mut surface, &tile.ghost, x, y, GHOST_ALPHA * alpha);

            let label = tile.record.cell().label();
            draw_cell_label(&mut surface, &self.font, &label, x, y, cell_size);
        }

        for tile in self.tiles.values_mut() {
            tile.fade_step = (tile.fade_step + 1).min(self.fade_steps);
        }

        surface
    }
}

/// Blend `src` over the rectangle of `dest` whose top-left corner is
/// `(x0, y0)`, clipped to the destination bounds.
fn blend_rect(dest: &mut RgbImage, src: &RgbImage, x0: u32, y0: u32, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha == 0.0 {
        return;
    }
    for (sx, sy, s) in src.enumerate_pixels() {
        let (dx, dy) = (x0 + sx, y0 + sy);
        if dx >= dest.width() || dy >= dest.height() {
            continue;
        }
        let d = dest.get_pixel_mut(dx, dy);
        for c in 0..3 {
            d.0[c] = (d.0[c] as f32 * (1.0 - alpha) + s.0[c] as f32 * alpha).round() as u8;
        }
    }
}

/// Cell label in the bottom-right corner, with a 1px shadow for contrast
/// against bright tiles.
fn draw_cell_label(
    surface: &mut RgbImage,
    font: &Font<'static>,
    label: &str,
    cell_x: u32,
    cell_y: u32,
    cell_size: u32,
) {
    let scale = Scale::uniform((cell_size as f32 * 0.18).max(10.0));
    let (text_w, text_h) = text_size(scale, font, label);
    let pad = (cell_size as i32 / 20).max(2);

    let x = cell_x as i32 + cell_size as i32 - text_w - pad;
    let y = cell_y as i32 + cell_size as i32 - text_h - pad;

    draw_text_mut(surface, LABEL_SHADOW, x + 1, y + 1, scale, font, label);
    draw_text_mut(surface, LABEL_COLOR, x, y, scale, font, label);
}
