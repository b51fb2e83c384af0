//! Collision-avoiding random cell placement
//!
//! Picks an unoccupied cell uniformly at random for a new capture. Random
//! probing keeps the common sparse case cheap; a bounded probe count plus a
//! free-cell scan fallback guarantees termination on densely filled grids
//! instead of spinning until a lucky hit.

use std::collections::HashSet;

use rand::Rng;

use crate::error::MosaicError;
use crate::grid::{Cell, Grid};

/// Random probes before falling back to scanning the free cells directly.
const MAX_RANDOM_PROBES: u32 = 64;

/// Number of cells of `grid` present in `used`. Stale snapshots can carry
/// cells from an older, larger grid; those must not count as occupancy.
pub fn occupied_count(used: &HashSet<Cell>, grid: Grid) -> usize {
    used.iter().filter(|c| grid.contains(**c)).count()
}

/// Choose one unoccupied cell.
///
/// Returns `AllocationExhausted` when the grid is full. Callers that want a
/// user-facing "mosaic complete" state should check occupancy up front and
/// refuse the capture before compositing any image data.
pub fn allocate_cell(
    used: &HashSet<Cell>,
    grid: Grid,
    rng: &mut impl Rng,
) -> Result<Cell, MosaicError> {
    if occupied_count(used, grid) >= grid.cell_count() as usize {
        return Err(MosaicError::AllocationExhausted {
            rows: grid.rows(),
            cols: grid.cols(),
        });
    }

    for _ in 0..MAX_RANDOM_PROBES {
        let cell = Cell::new(rng.gen_range(0..grid.rows()), rng.gen_range(0..grid.cols()));
        if !used.contains(&cell) {
            return Ok(cell);
        }
    }

    // Dense grid: pick uniformly among the remaining free cells. Non-empty
    // by the occupancy check above.
    let free: Vec<Cell> = grid.cells().filter(|c| !used.contains(c)).collect();
    Ok(free[rng.gen_range(0..free.len())])
}
