//! Grid geometry and cell addressing
//!
//! Pure coordinate math shared by the compositor (reference-image crops),
//! the renderer (cell placement on the display surface) and the web API
//! (human-readable cell labels). Everything here is side-effect free.

use crate::error::MosaicError;

/// Immutable rows x cols partition of the reference image and the display
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    rows: u32,
    cols: u32,
}

impl Grid {
    pub fn new(rows: u32, cols: u32) -> Result<Self, MosaicError> {
        if rows == 0 || cols == 0 {
            return Err(MosaicError::InvalidGrid { rows, cols });
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn cell_count(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        let cols = self.cols;
        (0..self.rows).flat_map(move |row| (0..cols).map(move |col| Cell::new(row, col)))
    }
}

/// One addressable grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
}

impl Cell {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Display label: spreadsheet-style letters for the row, then the
    /// 1-based column. Row 2, col 3 is "C-4"; row 26 starts "AA".
    pub fn label(&self) -> String {
        let mut letters = Vec::new();
        let mut n = self.row;
        loop {
            letters.push((b'A' + (n % 26) as u8) as char);
            if n < 26 {
                break;
            }
            n = n / 26 - 1;
        }
        let prefix: String = letters.into_iter().rev().collect();
        format!("{}-{}", prefix, self.col + 1)
    }
}

/// Pixel-space rectangle of one cell on some surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Rectangle covered by `cell` when the grid is laid over a
/// `width x height` surface.
///
/// Edges land on `floor(col * width / cols)`, so the rectangles of all cells
/// tile the surface exactly; remainder pixels are distributed across the
/// grid rather than lost at the far edge.
pub fn cell_rect(cell: Cell, grid: Grid, width: u32, height: u32) -> CellRect {
    let x0 = (cell.col as u64 * width as u64 / grid.cols() as u64) as u32;
    let x1 = ((cell.col as u64 + 1) * width as u64 / grid.cols() as u64) as u32;
    let y0 = (cell.row as u64 * height as u64 / grid.rows() as u64) as u32;
    let y1 = ((cell.row as u64 + 1) * height as u64 / grid.rows() as u64) as u32;
    CellRect {
        x: x0,
        y: y0,
        w: x1 - x0,
        h: y1 - y0,
    }
}

/// Largest uniform square-cell layout that fits the grid inside a container,
/// centered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CenteredFit {
    pub cell_size: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl CenteredFit {
    /// Top-left pixel of `cell` under this layout.
    pub fn cell_origin(&self, cell: Cell) -> (u32, u32) {
        (
            self.offset_x + cell.col * self.cell_size,
            self.offset_y + cell.row * self.cell_size,
        )
    }
}

/// `cell_size = floor(min(w/cols, h/rows))`; the offsets center the
/// resulting block. A container smaller than the grid yields `cell_size`
/// zero, which callers must treat as "nothing to draw".
pub fn centered_fit(container_w: u32, container_h: u32, grid: Grid) -> CenteredFit {
    let cell_size = (container_w / grid.cols()).min(container_h / grid.rows());
    CenteredFit {
        cell_size,
        offset_x: (container_w - cell_size * grid.cols()) / 2,
        offset_y: (container_h - cell_size * grid.rows()) / 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_grid_validation() {
        assert!(Grid::new(5, 8).is_ok());
        assert!(Grid::new(0, 8).is_err());
        assert!(Grid::new(5, 0).is_err());
        assert_eq!(Grid::new(5, 8).unwrap().cell_count(), 40);
    }

    #[test]
    fn test_cell_labels() {
        assert_eq!(Cell::new(0, 0).label(), "A-1");
        assert_eq!(Cell::new(2, 3).label(), "C-4");
        assert_eq!(Cell::new(25, 0).label(), "Z-1");
        assert_eq!(Cell::new(26, 0).label(), "AA-1");
        assert_eq!(Cell::new(27, 9).label(), "AB-10");
        assert_eq!(Cell::new(51, 0).label(), "AZ-1");
        assert_eq!(Cell::new(52, 0).label(), "BA-1");
    }

    #[test]
    fn test_labels_unique_beyond_26_rows() {
        let grid = Grid::new(60, 4).unwrap();
        let labels: HashSet<String> = grid.cells().map(|c| c.label()).collect();
        assert_eq!(labels.len(), grid.cell_count() as usize);
    }

    #[test]
    fn test_cell_rects_tile_surface_exactly() {
        // Deliberately awkward dimensions that do not divide evenly.
        let grid = Grid::new(3, 7).unwrap();
        let (w, h) = (100u32, 37u32);

        let mut covered = vec![0u32; (w * h) as usize];
        for cell in grid.cells() {
            let r = cell_rect(cell, grid, w, h);
            for y in r.y..r.y + r.h {
                for x in r.x..r.x + r.w {
                    covered[(y * w + x) as usize] += 1;
                }
            }
        }
        // Every pixel covered exactly once: no gaps, no overlaps.
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_adjacent_rects_share_edges() {
        let grid = Grid::new(5, 8).unwrap();
        for row in 0..5 {
            for col in 0..7 {
                let a = cell_rect(Cell::new(row, col), grid, 1203, 677);
                let b = cell_rect(Cell::new(row, col + 1), grid, 1203, 677);
                assert_eq!(a.x + a.w, b.x);
            }
        }
    }

    #[test]
    fn test_centered_fit() {
        let grid = Grid::new(5, 8).unwrap();

        let exact = centered_fit(800, 500, grid);
        assert_eq!(exact.cell_size, 100);
        assert_eq!((exact.offset_x, exact.offset_y), (0, 0));

        let fit = centered_fit(900, 520, grid);
        assert_eq!(fit.cell_size, 104);
        assert_eq!(fit.offset_x, (900 - fit.cell_size * 8) / 2);
        assert_eq!(fit.offset_y, (520 - fit.cell_size * 5) / 2);
        assert!(fit.cell_size * 8 <= 900);
        assert!(fit.cell_size * 5 <= 520);
    }

    #[test]
    fn test_centered_fit_tiny_container() {
        let grid = Grid::new(10, 10).unwrap();
        let fit = centered_fit(5, 5, grid);
        assert_eq!(fit.cell_size, 0);
    }

    #[test]
    fn test_cell_origin() {
        let grid = Grid::new(5, 8).unwrap();
        let fit = centered_fit(820, 520, grid);
        let (x, y) = fit.cell_origin(Cell::new(1, 2));
        assert_eq!(x, fit.offset_x + 2 * fit.cell_size);
        assert_eq!(y, fit.offset_y + fit.cell_size);
    }
}
