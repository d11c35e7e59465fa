//! Anvil backend: chunks stored in `.mca` region files on disk.

mod chunk;
mod palette;

pub use chunk::{AnvilChunk, MAX_SECTION, MIN_SECTION};
pub use palette::PalettedBlocks;

use std::path::{Path, PathBuf};

use anyhow::Context;
use levelshift_anvil::RegionFile;

use crate::coords::RegionPos;
use crate::storage::{RegionAccessor, StorageProvider};
use crate::world::World;

/// Opens region files from a world's region directory.
#[derive(Debug, Clone)]
pub struct AnvilProvider {
    region_dir: PathBuf,
}

impl AnvilProvider {
    pub fn new(region_dir: impl Into<PathBuf>) -> Self {
        Self {
            region_dir: region_dir.into(),
        }
    }

    pub fn for_world(world: &World) -> Self {
        Self::new(world.region_dir())
    }

    pub fn region_dir(&self) -> &Path {
        &self.region_dir
    }
}

impl StorageProvider for AnvilProvider {
    type Region = AnvilRegion;

    /// Only existing files are opened; migrating never creates regions.
    fn open_region(&self, pos: RegionPos) -> anyhow::Result<AnvilRegion> {
        let path = self.region_dir.join(pos.file_name());
        if !path.is_file() {
            anyhow::bail!("Region file {} does not exist", path.display());
        }
        let file = RegionFile::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        log::debug!("Opened region {} at {}", pos, path.display());
        Ok(AnvilRegion { pos, file })
    }
}

/// One open region file.
pub struct AnvilRegion {
    pos: RegionPos,
    file: RegionFile,
}

impl RegionAccessor for AnvilRegion {
    type Chunk = AnvilChunk;

    fn read_chunk(&mut self, chunk_x: u8, chunk_z: u8) -> anyhow::Result<Option<AnvilChunk>> {
        let Some(nbt) = self.file.read_chunk(chunk_x, chunk_z)? else {
            return Ok(None);
        };
        let chunk = AnvilChunk::from_nbt(&nbt)?;

        // A chunk filed under the wrong slot would be shifted and written back somewhere else
        let expected = self.pos.local_to_world(chunk_x, chunk_z);
        let found = chunk.position()?;
        if found != expected {
            anyhow::bail!("Chunk claims position {:?} but is stored at {:?}", found, expected);
        }
        Ok(Some(chunk))
    }

    fn write_chunk(&mut self, chunk_x: u8, chunk_z: u8, chunk: &AnvilChunk) -> anyhow::Result<()> {
        let nbt = chunk.to_nbt()?;
        self.file.write_chunk(chunk_x, chunk_z, &nbt)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.file
            .close()
            .with_context(|| format!("Failed to flush header of {}", self.file.path().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::chunk::tests::legacy_chunk_nbt;
    use super::*;
    use crate::chunk::{BlockState, ChunkAccess, Layer};
    use crate::shift::shift_chunk;

    #[test]
    fn test_missing_region_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = AnvilProvider::for_world(&World::new("w", dir.path()));
        assert_eq!(provider.region_dir(), dir.path().join("region"));
        assert!(provider.open_region(RegionPos::new(0, 0)).is_err());
        // Nothing was created as a side effect
        assert!(!dir.path().join("region").join("r.0.0.mca").exists());
    }

    #[test]
    fn test_read_shift_write() {
        let dir = tempfile::tempdir().unwrap();
        let pos = RegionPos::new(-1, 2);
        {
            let mut file = RegionFile::open(dir.path().join(pos.file_name())).unwrap();
            let (x, z) = pos.local_to_world(3, 4);
            file.write_chunk(3, 4, &legacy_chunk_nbt(x, z, 5)).unwrap();
            file.close().unwrap();
        }

        let provider = AnvilProvider::new(dir.path());
        let mut region = provider.open_region(pos).unwrap();
        assert!(region.read_chunk(0, 0).unwrap().is_none());

        let mut chunk = region.read_chunk(3, 4).unwrap().unwrap();
        chunk.backward_compatibility_update(&World::new("w", dir.path())).unwrap();
        chunk.init_chunk().unwrap();
        shift_chunk(&mut chunk).unwrap();
        region.write_chunk(3, 4, &chunk).unwrap();
        region.close().unwrap();

        let mut region = provider.open_region(pos).unwrap();
        let mut chunk = region.read_chunk(3, 4).unwrap().unwrap();
        chunk.init_chunk().unwrap();
        assert_eq!(chunk.min_section(), Some(MIN_SECTION as i32));
        assert_eq!(chunk.highest_occupied_y(0, 0, false), 69);
        assert_eq!(chunk.block_state(0, 64, 0, Layer::Secondary), BlockState::new("minecraft:water"));
    }

    #[test]
    fn test_misplaced_chunk_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pos = RegionPos::new(0, 0);
        {
            let mut file = RegionFile::open(dir.path().join(pos.file_name())).unwrap();
            file.write_chunk(1, 1, &legacy_chunk_nbt(7, 7, 0)).unwrap();
            file.close().unwrap();
        }

        let mut region = AnvilProvider::new(dir.path()).open_region(pos).unwrap();
        assert!(region.read_chunk(1, 1).is_err());
    }
}
