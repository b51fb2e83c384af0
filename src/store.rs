//! Tile and project persistence
//!
//! The engine never talks to a hidden global backend client; every component
//! receives an explicit [`TileStore`] handle. The production implementation
//! is a per-project directory tree on the local filesystem; tests use the
//! in-memory variant.
//!
//! Tiles are append-only: created once for their cell, deleted individually
//! (moderation) or in bulk (project reset), never updated.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::error::MosaicError;
use crate::grid::Cell;

/// Per-project grid dimensions and reference image file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSetup {
    pub rows: u32,
    pub cols: u32,
    /// File name of the reference image inside the project directory.
    pub reference: String,
}

/// One persisted, composited capture occupying a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    pub id: u64,
    pub row: u32,
    pub col: u32,
    pub image_url: String,
    /// Unix seconds.
    pub created_at: u64,
}

impl TileRecord {
    pub fn cell(&self) -> Cell {
        Cell::new(self.row, self.col)
    }
}

/// Storage operations the mosaic engine depends on. Uniqueness of
/// `(project, row, col)` is not enforced here; the capture flow serializes
/// allocation and persistence to avoid placing two tiles in one cell.
pub trait TileStore: Send + Sync {
    fn get_setup(&self, project: &str) -> Result<ProjectSetup, MosaicError>;
    fn put_setup(&self, project: &str, setup: &ProjectSetup) -> Result<(), MosaicError>;

    fn list_tiles(&self, project: &str) -> Result<Vec<TileRecord>, MosaicError>;
    fn create_tile(&self, project: &str, cell: Cell, image: &[u8])
        -> Result<TileRecord, MosaicError>;
    fn tile_image(&self, project: &str, id: u64) -> Result<Vec<u8>, MosaicError>;
    fn delete_tile(&self, project: &str, id: u64) -> Result<(), MosaicError>;
    fn clear_tiles(&self, project: &str) -> Result<(), MosaicError>;

    fn reference_image(&self, project: &str) -> Result<Vec<u8>, MosaicError>;
    fn put_reference_image(&self, project: &str, image: &[u8]) -> Result<(), MosaicError>;
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn tile_url(project: &str, id: u64) -> String {
    format!("/api/projects/{}/tiles/{}/image", project, id)
}

/// Persisted tile index of one project.
#[derive(Debug, Serialize, Deserialize)]
struct TileIndex {
    next_id: u64,
    tiles: Vec<TileRecord>,
}

impl Default for TileIndex {
    fn default() -> Self {
        Self {
            next_id: 1,
            tiles: Vec::new(),
        }
    }
}

/// Filesystem-backed store.
///
/// Layout per project:
/// `<root>/<project>/setup.json`, `tiles.json`, `reference.<ext>` and
/// `tiles/<id>.jpg`.
pub struct FsStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on the per-project tile index.
    index_lock: Mutex<()>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    fn setup_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("setup.json")
    }

    fn index_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("tiles.json")
    }

    fn tile_path(&self, project: &str, id: u64) -> PathBuf {
        self.project_dir(project).join("tiles").join(format!("{}.jpg", id))
    }

    fn load_index(&self, project: &str) -> Result<TileIndex, MosaicError> {
        let path = self.index_path(project);
        if !path.exists() {
            return Ok(TileIndex::default());
        }
        let content = std::fs::read_to_string(&path).map_err(MosaicError::StoreRead)?;
        serde_json::from_str(&content).map_err(MosaicError::StoreCorrupt)
    }

    fn save_index(&self, project: &str, index: &TileIndex) -> Result<(), MosaicError> {
        let content = serde_json::to_string_pretty(index).map_err(MosaicError::StoreCorrupt)?;
        write_file(&self.index_path(project), content.as_bytes())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), MosaicError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(MosaicError::StoreWrite)?;
    }
    std::fs::write(path, bytes).map_err(MosaicError::StoreWrite)
}

impl TileStore for FsStore {
    fn get_setup(&self, project: &str) -> Result<ProjectSetup, MosaicError> {
        let path = self.setup_path(project);
        if !path.exists() {
            return Err(MosaicError::ProjectNotFound(project.to_string()));
        }
        let content = std::fs::read_to_string(&path).map_err(MosaicError::StoreRead)?;
        serde_json::from_str(&content).map_err(MosaicError::StoreCorrupt)
    }

    fn put_setup(&self, project: &str, setup: &ProjectSetup) -> Result<(), MosaicError> {
        let content = serde_json::to_string_pretty(setup).map_err(MosaicError::StoreCorrupt)?;
        write_file(&self.setup_path(project), content.as_bytes())
    }

    fn list_tiles(&self, project: &str) -> Result<Vec<TileRecord>, MosaicError> {
        Ok(self.load_index(project)?.tiles)
    }

    fn create_tile(
        &self,
        project: &str,
        cell: Cell,
        image: &[u8],
    ) -> Result<TileRecord, MosaicError> {
        let _guard = self.index_lock.lock();

        let mut index = self.load_index(project)?;
        let id = index.next_id;

        write_file(&self.tile_path(project, id), image)?;

        let record = TileRecord {
            id,
            row: cell.row,
            col: cell.col,
            image_url: tile_url(project, id),
            created_at: unix_now(),
        };
        index.next_id += 1;
        index.tiles.push(record.clone());
        self.save_index(project, &index)?;

        Ok(record)
    }

    fn tile_image(&self, project: &str, id: u64) -> Result<Vec<u8>, MosaicError> {
        let path = self.tile_path(project, id);
        if !path.exists() {
            return Err(MosaicError::TileNotFound(id));
        }
        std::fs::read(&path).map_err(MosaicError::StoreRead)
    }

    fn delete_tile(&self, project: &str, id: u64) -> Result<(), MosaicError> {
        let _guard = self.index_lock.lock();

        let mut index = self.load_index(project)?;
        let before = index.tiles.len();
        index.tiles.retain(|t| t.id != id);
        if index.tiles.len() == before {
            return Err(MosaicError::TileNotFound(id));
        }
        self.save_index(project, &index)?;

        if let Err(e) = std::fs::remove_file(self.tile_path(project, id)) {
            // The index entry is already gone; an orphaned image file is
            // harmless, so log instead of failing the delete.
            warn!("Could not remove tile image {}: {}", id, e);
        }
        Ok(())
    }

    fn clear_tiles(&self, project: &str) -> Result<(), MosaicError> {
        let _guard = self.index_lock.lock();

        self.save_index(project, &TileIndex::default())?;
        let tiles_dir = self.project_dir(project).join("tiles");
        if tiles_dir.exists() {
            std::fs::remove_dir_all(&tiles_dir).map_err(MosaicError::StoreWrite)?;
        }
        Ok(())
    }

    fn reference_image(&self, project: &str) -> Result<Vec<u8>, MosaicError> {
        let setup = self.get_setup(project)?;
        let path = self.project_dir(project).join(&setup.reference);
        std::fs::read(&path).map_err(MosaicError::StoreRead)
    }

    fn put_reference_image(&self, project: &str, image: &[u8]) -> Result<(), MosaicError> {
        let setup = self.get_setup(project)?;
        write_file(&self.project_dir(project).join(&setup.reference), image)
    }
}

#[derive(Default)]
struct MemoryProject {
    setup: Option<ProjectSetup>,
    next_id: u64,
    tiles: Vec<TileRecord>,
    images: HashMap<u64, Vec<u8>>,
    reference: Option<Vec<u8>>,
}

/// In-memory store used by tests and quick demos.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, MemoryProject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileStore for MemoryStore {
    fn get_setup(&self, project: &str) -> Result<ProjectSetup, MosaicError> {
        self.projects
            .lock()
            .get(project)
            .and_then(|p| p.setup.clone())
            .ok_or_else(|| MosaicError::ProjectNotFound(project.to_string()))
    }

    fn put_setup(&self, project: &str, setup: &ProjectSetup) -> Result<(), MosaicError> {
        self.projects
            .lock()
            .entry(project.to_string())
            .or_default()
            .setup = Some(setup.clone());
        Ok(())
    }

    fn list_tiles(&self, project: &str) -> Result<Vec<TileRecord>, MosaicError> {
        Ok(self
            .projects
            .lock()
            .get(project)
            .map(|p| p.tiles.clone())
            .unwrap_or_default())
    }

    fn create_tile(
        &self,
        project: &str,
        cell: Cell,
        image: &[u8],
    ) -> Result<TileRecord, MosaicError> {
        let mut projects = self.projects.lock();
        let proj = projects.entry(project.to_string()).or_default();
        proj.next_id += 1;
        let id = proj.next_id;
        let record = TileRecord {
            id,
            row: cell.row,
            col: cell.col,
            image_url: tile_url(project, id),
            created_at: unix_now(),
        };
        proj.tiles.push(record.clone());
        proj.images.insert(id, image.to_vec());
        Ok(record)
    }

    fn tile_image(&self, project: &str, id: u64) -> Result<Vec<u8>, MosaicError> {
        self.projects
            .lock()
            .get(project)
            .and_then(|p| p.images.get(&id).cloned())
            .ok_or(MosaicError::TileNotFound(id))
    }

    fn delete_tile(&self, project: &str, id: u64) -> Result<(), MosaicError> {
        let mut projects = self.projects.lock();
        let proj = projects
            .get_mut(project)
            .ok_or_else(|| MosaicError::ProjectNotFound(project.to_string()))?;
        let before = proj.tiles.len();
        proj.tiles.retain(|t| t.id != id);
        if proj.tiles.len() == before {
            return Err(MosaicError::TileNotFound(id));
        }
        proj.images.remove(&id);
        Ok(())
    }

    fn clear_tiles(&self, project: &str) -> Result<(), MosaicError> {
        let mut projects = self.projects.lock();
        if let Some(proj) = projects.get_mut(project) {
            proj.tiles.clear();
            proj.images.clear();
        }
        Ok(())
    }

    fn reference_image(&self, project: &str) -> Result<Vec<u8>, MosaicError> {
        self.projects
            .lock()
            .get(project)
            .and_then(|p| p.reference.clone())
            .ok_or_else(|| MosaicError::ProjectNotFound(project.to_string()))
    }

    fn put_reference_image(&self, project: &str, image: &[u8]) -> Result<(), MosaicError> {
        self.projects
            .lock()
            .entry(project.to_string())
            .or_default()
            .reference = Some(image.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mosaicbooth-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_fs_store_tile_lifecycle() {
        let root = temp_root("lifecycle");
        let store = FsStore::new(&root);

        assert!(matches!(
            store.get_setup("ev"),
            Err(MosaicError::ProjectNotFound(_))
        ));

        let setup = ProjectSetup {
            rows: 5,
            cols: 8,
            reference: "reference.jpg".to_string(),
        };
        store.put_setup("ev", &setup).unwrap();
        assert_eq!(store.get_setup("ev").unwrap(), setup);

        store.put_reference_image("ev", b"ref-bytes").unwrap();
        assert_eq!(store.reference_image("ev").unwrap(), b"ref-bytes");

        assert!(store.list_tiles("ev").unwrap().is_empty());

        let a = store.create_tile("ev", Cell::new(0, 0), b"img-a").unwrap();
        let b = store.create_tile("ev", Cell::new(2, 3), b"img-b").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.image_url, format!("/api/projects/ev/tiles/{}/image", a.id));

        let tiles = store.list_tiles("ev").unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(store.tile_image("ev", b.id).unwrap(), b"img-b");

        store.delete_tile("ev", a.id).unwrap();
        assert!(matches!(
            store.tile_image("ev", a.id),
            Err(MosaicError::TileNotFound(_))
        ));
        assert_eq!(store.list_tiles("ev").unwrap().len(), 1);

        // Ids keep increasing after deletes.
        let c = store.create_tile("ev", Cell::new(1, 1), b"img-c").unwrap();
        assert!(c.id > b.id);

        store.clear_tiles("ev").unwrap();
        assert!(store.list_tiles("ev").unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_fs_store_survives_reopen() {
        let root = temp_root("reopen");
        {
            let store = FsStore::new(&root);
            store
                .put_setup(
                    "ev",
                    &ProjectSetup {
                        rows: 2,
                        cols: 2,
                        reference: "reference.jpg".to_string(),
                    },
                )
                .unwrap();
            store.create_tile("ev", Cell::new(1, 0), b"img").unwrap();
        }
        let store = FsStore::new(&root);
        let tiles = store.list_tiles("ev").unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].cell(), Cell::new(1, 0));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_memory_store_matches_trait_semantics() {
        let store = MemoryStore::new();
        let rec = store.create_tile("ev", Cell::new(3, 4), b"bytes").unwrap();
        assert_eq!(store.tile_image("ev", rec.id).unwrap(), b"bytes");
        assert_eq!(store.list_tiles("ev").unwrap().len(), 1);
        assert!(matches!(
            store.delete_tile("ev", 999),
            Err(MosaicError::TileNotFound(999))
        ));
        store.delete_tile("ev", rec.id).unwrap();
        assert!(store.list_tiles("ev").unwrap().is_empty());
    }
}
