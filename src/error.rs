//! Error taxonomy for the mosaic engine

use thiserror::Error;

/// Errors surfaced by the placement, compositing and storage layers.
///
/// Capture-side callers map these to HTTP responses; the display loop only
/// ever logs them and keeps the previous frame on screen.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// Every cell of the grid is occupied. The capture flow checks occupancy
    /// before allocating and reports the mosaic as complete.
    #[error("mosaic complete: all {rows}x{cols} cells are occupied")]
    AllocationExhausted { rows: u32, cols: u32 },

    /// A captured photo or the reference image failed to decode. Fatal for
    /// the compositor; the renderer degrades to a placeholder instead.
    #[error("image decode failed: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// Encoding a composited tile or rendered frame failed.
    #[error("image encode failed: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// Persisting a tile image or index entry failed.
    #[error("store write failed: {0}")]
    StoreWrite(#[source] std::io::Error),

    /// Reading from the tile store failed.
    #[error("store read failed: {0}")]
    StoreRead(#[source] std::io::Error),

    /// The tile index or project setup on disk is unparsable.
    #[error("store metadata corrupt: {0}")]
    StoreCorrupt(#[source] serde_json::Error),

    #[error("tile {0} not found")]
    TileNotFound(u64),

    #[error("project {0:?} not found")]
    ProjectNotFound(String),

    #[error("invalid grid: rows and cols must be at least 1 (got {rows}x{cols})")]
    InvalidGrid { rows: u32, cols: u32 },

    /// The reference image is locked once the first tile has been captured;
    /// replacing it would misalign every existing tile crop.
    #[error("reference image is locked: project already has {0} tiles")]
    ReferenceLocked(usize),
}
