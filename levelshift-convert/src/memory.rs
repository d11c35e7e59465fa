//! In-memory storage backend.
//!
//! Useful for development and testing. Nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::chunk::{is_valid_y, BlockEntity, BlockState, ChunkAccess, Layer, MAX_Y, MIN_Y};
use crate::coords::RegionPos;
use crate::storage::{RegionAccessor, StorageProvider};
use crate::world::World;

/// A chunk held entirely in memory. Plain air cells are not stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryChunk {
    // Keyed column first so a column is one contiguous range
    blocks: BTreeMap<(u8, u8, i32, Layer), BlockState>,
    block_entities: Vec<BlockEntity>,
    upgraded: bool,
    initialized: bool,
}

impl MemoryChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block_entity(&mut self, entity: BlockEntity) {
        self.block_entities.push(entity);
    }

    pub fn block_entities(&self) -> &[BlockEntity] {
        &self.block_entities
    }

    /// Number of stored cells across both layers.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether both preparation steps ran since the chunk was stored.
    pub fn is_prepared(&self) -> bool {
        self.upgraded && self.initialized
    }
}

impl ChunkAccess for MemoryChunk {
    fn highest_occupied_y(&self, dx: u8, dz: u8, include_air: bool) -> i32 {
        if include_air {
            return MAX_Y;
        }
        self.blocks
            .range((dx, dz, MIN_Y, Layer::Primary)..=(dx, dz, MAX_Y, Layer::Secondary))
            .rev()
            .find(|((_, _, _, layer), state)| *layer == Layer::Primary && !state.is_air())
            .map(|((_, _, y, _), _)| *y)
            .unwrap_or(MIN_Y - 1)
    }

    fn block_state(&self, dx: u8, y: i32, dz: u8, layer: Layer) -> BlockState {
        self.blocks.get(&(dx, dz, y, layer)).cloned().unwrap_or_default()
    }

    fn set_block_state(&mut self, dx: u8, y: i32, dz: u8, layer: Layer, state: BlockState) -> anyhow::Result<()> {
        if dx > 15 || dz > 15 || !is_valid_y(y) {
            anyhow::bail!("Block ({}, {}, {}) is outside the chunk", dx, y, dz);
        }
        if state == BlockState::air() {
            self.blocks.remove(&(dx, dz, y, layer));
        } else {
            self.blocks.insert((dx, dz, y, layer), state);
        }
        Ok(())
    }

    fn backward_compatibility_update(&mut self, _world: &World) -> anyhow::Result<()> {
        self.upgraded = true;
        Ok(())
    }

    fn init_chunk(&mut self) -> anyhow::Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn block_entities_mut(&mut self) -> &mut [BlockEntity] {
        &mut self.block_entities
    }
}

#[derive(Debug, Default)]
struct Store {
    chunks: HashMap<(RegionPos, u8, u8), MemoryChunk>,
    closed: Vec<RegionPos>,
}

/// In-memory chunk storage shared by every region accessor it hands out.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    store: Arc<RwLock<Store>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_chunk(&self, region: RegionPos, chunk_x: u8, chunk_z: u8, chunk: MemoryChunk) {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.chunks.insert((region, chunk_x, chunk_z), chunk);
    }

    pub fn chunk(&self, region: RegionPos, chunk_x: u8, chunk_z: u8) -> Option<MemoryChunk> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.chunks.get(&(region, chunk_x, chunk_z)).cloned()
    }

    pub fn chunk_count(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).chunks.len()
    }

    /// Regions closed so far, in closing order.
    pub fn closed_regions(&self) -> Vec<RegionPos> {
        self.store.read().unwrap_or_else(PoisonError::into_inner).closed.clone()
    }
}

impl StorageProvider for MemoryProvider {
    type Region = MemoryRegion;

    fn open_region(&self, pos: RegionPos) -> anyhow::Result<MemoryRegion> {
        Ok(MemoryRegion {
            pos,
            store: Arc::clone(&self.store),
        })
    }
}

/// Accessor for one region of a [`MemoryProvider`].
#[derive(Debug)]
pub struct MemoryRegion {
    pos: RegionPos,
    store: Arc<RwLock<Store>>,
}

impl RegionAccessor for MemoryRegion {
    type Chunk = MemoryChunk;

    fn read_chunk(&mut self, chunk_x: u8, chunk_z: u8) -> anyhow::Result<Option<MemoryChunk>> {
        let store = self.store.read().map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(store.chunks.get(&(self.pos, chunk_x, chunk_z)).cloned())
    }

    fn write_chunk(&mut self, chunk_x: u8, chunk_z: u8, chunk: &MemoryChunk) -> anyhow::Result<()> {
        let mut store = self.store.write().map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        store.chunks.insert((self.pos, chunk_x, chunk_z), chunk.clone());
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        let mut store = self.store.write().map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        store.closed.push(self.pos);
        Ok(())
    }
}
