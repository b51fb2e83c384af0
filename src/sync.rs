//! Live display sync loop
//!
//! Blocking poll loop, run on its own thread via `spawn_blocking`: fetch the
//! tile snapshot, hand it to the renderer, publish fade frames until every
//! new tile is fully revealed, then sleep out the rest of the poll interval.
//! Ticks are strictly sequential, so two renders can never overlap on the
//! shared surface.
//!
//! Cancellation is the only control signal. The flag is checked after every
//! fetch and before every publish, so a fetch that resolves after teardown
//! can never put a frame on screen. A failed fetch is logged and skipped;
//! the previous frame stays up.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::compose::encode_jpeg;
use crate::error::MosaicError;
use crate::render::MosaicRenderer;
use crate::server::AppState;
use crate::store::{TileRecord, TileStore};

/// JPEG quality of published display frames.
const FRAME_JPEG_QUALITY: u8 = 70;

/// Granularity of cancellable sleeps inside the loop.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Run the display loop until `cancel` is set.
pub fn run_display_loop(state: Arc<AppState>, cancel: Arc<AtomicBool>) -> Result<()> {
    let (width, height, interval, fade_interval, fade_steps) = {
        let config = state.config.read();
        (
            config.mosaic.display_width,
            config.mosaic.display_height,
            Duration::from_millis(config.mosaic.sync_interval_ms),
            Duration::from_millis(config.mosaic.fade_interval_ms),
            config.mosaic.fade_steps,
        )
    };
    let grid = state.grid();
    let project = state.project_id();
    let store = state.store();

    let mut renderer = MosaicRenderer::new(width, height, grid, fade_steps)?;
    info!(
        "Display loop started: {}x{} surface, {}x{} grid, {}ms poll",
        width,
        height,
        grid.rows(),
        grid.cols(),
        interval.as_millis()
    );

    while !cancel.load(Ordering::SeqCst) {
        match fetch_snapshot(store.as_ref(), &project) {
            Ok(snapshot) => {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                let reference = state.reference();
                renderer.sync_tiles(snapshot, &reference);

                // Publish frames until every mid-fade tile has settled; in
                // steady state this is exactly one frame per tick.
                loop {
                    let frame = renderer.render_frame();
                    if cancel.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    match encode_jpeg(&frame, FRAME_JPEG_QUALITY) {
                        Ok(jpeg) => state.publish_frame(jpeg),
                        Err(e) => warn!("Frame encode failed: {}", e),
                    }
                    if !renderer.fading() {
                        break;
                    }
                    if !sleep_cancellable(fade_interval, &cancel) {
                        return Ok(());
                    }
                }
            }
            Err(e) => warn!("Tile fetch failed, keeping previous frame: {}", e),
        }

        if !sleep_cancellable(interval, &cancel) {
            break;
        }
    }

    info!("Display loop stopped");
    Ok(())
}

/// Fetch the tile records plus their stored images. A tile whose image read
/// fails stays in the snapshot without bytes; the renderer shows its
/// placeholder instead of dropping the cell.
fn fetch_snapshot(
    store: &dyn TileStore,
    project: &str,
) -> Result<Vec<(TileRecord, Option<Vec<u8>>)>, MosaicError> {
    let records = store.list_tiles(project)?;
    Ok(records
        .into_iter()
        .map(|record| {
            let bytes = match store.tile_image(project, record.id) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Image of tile {} unavailable: {}", record.id, e);
                    None
                }
            };
            (record, bytes)
        })
        .collect())
}

/// Sleep in short slices, bailing out as soon as `cancel` is set. Returns
/// false when cancelled.
fn sleep_cancellable(total: Duration, cancel: &AtomicBool) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(SLEEP_SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    !cancel.load(Ordering::SeqCst)
}
