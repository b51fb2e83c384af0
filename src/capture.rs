//! Kiosk capture flow
//!
//! One placement session per capture: snapshot the occupied cells from the
//! store, refuse a full grid before touching any image data, pick a free
//! cell, composite, persist. Persistence gets a single retry with a short
//! backoff; after that the composited image and the chosen cell are
//! discarded and the participant is asked to retry.

use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::allocate::{allocate_cell, occupied_count};
use crate::compose::compose_tile;
use crate::error::MosaicError;
use crate::grid::{Cell, Grid};
use crate::store::{TileRecord, TileStore};

/// Pause before the single persist retry.
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(150);

/// Occupancy snapshot for one in-progress capture. Built from the store at
/// the start of the flow and discarded as soon as the tile is persisted or
/// the capture is abandoned.
pub struct PlacementSession {
    grid: Grid,
    used: HashSet<Cell>,
}

impl PlacementSession {
    pub fn begin(store: &dyn TileStore, project: &str, grid: Grid) -> Result<Self, MosaicError> {
        let used = store
            .list_tiles(project)?
            .iter()
            .map(|t| t.cell())
            .collect();
        Ok(Self { grid, used })
    }

    pub fn occupied(&self) -> usize {
        occupied_count(&self.used, self.grid)
    }

    pub fn is_full(&self) -> bool {
        self.occupied() >= self.grid.cell_count() as usize
    }

    pub fn allocate(&self, rng: &mut impl Rng) -> Result<Cell, MosaicError> {
        allocate_cell(&self.used, self.grid, rng)
    }
}

/// Run the full capture flow for one photo and return the persisted record.
///
/// Callers serialize invocations per project (see the capture lock in
/// `AppState`); within one process two captures can therefore never race on
/// the same free cell.
pub fn process_capture(
    store: &dyn TileStore,
    project: &str,
    grid: Grid,
    reference: &image::RgbImage,
    tile_size: u32,
    photo_jpeg: &[u8],
    rng: &mut impl Rng,
) -> Result<TileRecord, MosaicError> {
    let session = PlacementSession::begin(store, project, grid)?;
    if session.is_full() {
        return Err(MosaicError::AllocationExhausted {
            rows: grid.rows(),
            cols: grid.cols(),
        });
    }

    let cell = session.allocate(rng)?;
    let tile = compose_tile(photo_jpeg, cell, grid, reference, tile_size)?;

    let record = match store.create_tile(project, cell, &tile) {
        Ok(record) => record,
        Err(e @ MosaicError::StoreWrite(_)) => {
            warn!("Tile persist failed, retrying once: {}", e);
            std::thread::sleep(STORE_RETRY_BACKOFF);
            store.create_tile(project, cell, &tile)?
        }
        Err(e) => return Err(e),
    };

    info!(
        "Captured tile {} at {} ({}/{} cells filled)",
        record.id,
        cell.label(),
        session.occupied() + 1,
        grid.cell_count()
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::encode_jpeg;
    use crate::store::MemoryStore;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn reference() -> RgbImage {
        RgbImage::from_pixel(400, 250, Rgb([0, 80, 160]))
    }

    fn photo() -> Vec<u8> {
        encode_jpeg(&RgbImage::from_pixel(120, 120, Rgb([210, 180, 60])), 90).unwrap()
    }

    fn fill_except(store: &MemoryStore, project: &str, grid: Grid, skip: Option<Cell>) {
        for cell in grid.cells() {
            if Some(cell) != skip {
                store.create_tile(project, cell, b"x").unwrap();
            }
        }
    }

    #[test]
    fn test_capture_lands_on_only_free_cell() {
        let store = MemoryStore::new();
        let grid = Grid::new(5, 8).unwrap();
        fill_except(&store, "ev", grid, Some(Cell::new(2, 3)));

        let mut rng = StdRng::seed_from_u64(11);
        let record =
            process_capture(&store, "ev", grid, &reference(), 32, &photo(), &mut rng).unwrap();
        assert_eq!(record.cell(), Cell::new(2, 3));
        assert_eq!(store.list_tiles("ev").unwrap().len(), 40);
    }

    #[test]
    fn test_full_grid_refuses_capture() {
        let store = MemoryStore::new();
        let grid = Grid::new(5, 8).unwrap();
        fill_except(&store, "ev", grid, None);

        let mut rng = StdRng::seed_from_u64(11);
        let result = process_capture(&store, "ev", grid, &reference(), 32, &photo(), &mut rng);
        assert!(matches!(result, Err(MosaicError::AllocationExhausted { .. })));
        // Nothing was added.
        assert_eq!(store.list_tiles("ev").unwrap().len(), 40);
    }

    #[test]
    fn test_corrupt_photo_persists_nothing() {
        let store = MemoryStore::new();
        let grid = Grid::new(5, 8).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let result = process_capture(&store, "ev", grid, &reference(), 32, b"bad", &mut rng);
        assert!(matches!(result, Err(MosaicError::ImageDecode(_))));
        assert!(store.list_tiles("ev").unwrap().is_empty());
    }

    /// Fails the first `create_tile`, then delegates.
    struct FlakyStore {
        inner: MemoryStore,
        failed_once: AtomicBool,
    }

    impl TileStore for FlakyStore {
        fn get_setup(&self, p: &str) -> Result<crate::store::ProjectSetup, MosaicError> {
            self.inner.get_setup(p)
        }
        fn put_setup(&self, p: &str, s: &crate::store::ProjectSetup) -> Result<(), MosaicError> {
            self.inner.put_setup(p, s)
        }
        fn list_tiles(&self, p: &str) -> Result<Vec<TileRecord>, MosaicError> {
            self.inner.list_tiles(p)
        }
        fn create_tile(&self, p: &str, c: Cell, i: &[u8]) -> Result<TileRecord, MosaicError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(MosaicError::StoreWrite(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk hiccup",
                )));
            }
            self.inner.create_tile(p, c, i)
        }
        fn tile_image(&self, p: &str, id: u64) -> Result<Vec<u8>, MosaicError> {
            self.inner.tile_image(p, id)
        }
        fn delete_tile(&self, p: &str, id: u64) -> Result<(), MosaicError> {
            self.inner.delete_tile(p, id)
        }
        fn clear_tiles(&self, p: &str) -> Result<(), MosaicError> {
            self.inner.clear_tiles(p)
        }
        fn reference_image(&self, p: &str) -> Result<Vec<u8>, MosaicError> {
            self.inner.reference_image(p)
        }
        fn put_reference_image(&self, p: &str, i: &[u8]) -> Result<(), MosaicError> {
            self.inner.put_reference_image(p, i)
        }
    }

    #[test]
    fn test_store_write_failure_gets_one_retry() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failed_once: AtomicBool::new(false),
        };
        let grid = Grid::new(2, 2).unwrap();

        let mut rng = StdRng::seed_from_u64(5);
        let record =
            process_capture(&store, "ev", grid, &reference(), 32, &photo(), &mut rng).unwrap();
        assert_eq!(store.list_tiles("ev").unwrap(), vec![record]);
    }

    #[test]
    fn test_session_tracks_occupancy() {
        let store = MemoryStore::new();
        let grid = Grid::new(2, 2).unwrap();
        store.create_tile("ev", Cell::new(0, 0), b"x").unwrap();
        store.create_tile("ev", Cell::new(1, 1), b"x").unwrap();

        let session = PlacementSession::begin(&store, "ev", grid).unwrap();
        assert_eq!(session.occupied(), 2);
        assert!(!session.is_full());

        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..50 {
            let cell = session.allocate(&mut rng).unwrap();
            assert!(cell == Cell::new(0, 1) || cell == Cell::new(1, 0));
        }
    }
}
