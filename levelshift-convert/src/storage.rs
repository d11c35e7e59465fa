//! Storage seams consumed by the migration.
//!
//! Implementations of these traits can back a world with various stores:
//! - `MemoryProvider` - in-memory maps (for testing/embedding)
//! - `AnvilProvider` - `.mca` region files on disk

use crate::chunk::ChunkAccess;
use crate::coords::RegionPos;

/// Opens region accessors for one world.
///
/// Shared by every worker of a run, so it must be usable from many threads.
pub trait StorageProvider: Send + Sync {
    type Region: RegionAccessor;

    /// Open the region at the given coordinates for reading and writing.
    fn open_region(&self, pos: RegionPos) -> anyhow::Result<Self::Region>;
}

/// One open region, owned by exactly one worker while it is open.
pub trait RegionAccessor {
    type Chunk: ChunkAccess;

    /// Load the chunk at local coordinates (0-31).
    /// Returns None if the chunk has never been generated.
    fn read_chunk(&mut self, chunk_x: u8, chunk_z: u8) -> anyhow::Result<Option<Self::Chunk>>;

    /// Persist a chunk at local coordinates (0-31).
    fn write_chunk(&mut self, chunk_x: u8, chunk_z: u8, chunk: &Self::Chunk) -> anyhow::Result<()>;

    /// Release the region. Called once, whether or not the chunk loop succeeded.
    fn close(&mut self) -> anyhow::Result<()>;
}
