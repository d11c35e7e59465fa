//! Block-level view of a loaded chunk.

use std::collections::{BTreeMap, HashMap};

use crate::world::World;

/// Lowest block Y of the 384-tall range.
pub const MIN_Y: i32 = -64;

/// Highest block Y of the 384-tall range.
pub const MAX_Y: i32 = 319;

/// Vertical offset between the 256-tall and the 384-tall range.
pub const HEIGHT_SHIFT: i32 = 64;

pub const AIR: &str = "minecraft:air";

/// Whether `y` lies inside the 384-tall range.
#[inline]
pub fn is_valid_y(y: i32) -> bool {
    (MIN_Y..=MAX_Y).contains(&y)
}

/// The two block layers stored per cell.
///
/// The secondary layer holds auxiliary occupancy such as the water inside
/// a waterlogged block.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Layer {
    Primary,
    Secondary,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Primary, Layer::Secondary];

    pub fn index(self) -> usize {
        match self {
            Layer::Primary => 0,
            Layer::Secondary => 1,
        }
    }
}

/// A block name with its properties, e.g. `minecraft:oak_stairs[facing=east]`.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct BlockState {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> Self {
        Self::new(AIR)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_air(&self) -> bool {
        matches!(self.name.as_str(), AIR | "minecraft:cave_air" | "minecraft:void_air")
    }
}

impl Default for BlockState {
    fn default() -> Self {
        Self::air()
    }
}

/// A stateful object anchored to a block position (chests, signs, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEntity {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Every other tag of the entity, kept as-is.
    pub data: HashMap<String, fastnbt::Value>,
}

impl BlockEntity {
    pub fn new(id: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z,
            data: HashMap::new(),
        }
    }
}

/// What the migration needs from a loaded chunk.
///
/// Columns are addressed by local `dx`/`dz` in `0..16` and world `y`.
pub trait ChunkAccess {
    /// Highest Y in the column.
    ///
    /// With `include_air == false` this is the highest Y whose primary layer
    /// is not air, or `MIN_Y - 1` for an empty column. With `include_air == true`
    /// it is the top of the storage range.
    fn highest_occupied_y(&self, dx: u8, dz: u8, include_air: bool) -> i32;

    /// Block at a cell. Cells outside the storage range read as air.
    fn block_state(&self, dx: u8, y: i32, dz: u8, layer: Layer) -> BlockState;

    /// Replace the block at a cell. Fails for cells outside the storage range.
    fn set_block_state(&mut self, dx: u8, y: i32, dz: u8, layer: Layer, state: BlockState) -> anyhow::Result<()>;

    /// Bring an older on-disk layout up to what the current code expects.
    fn backward_compatibility_update(&mut self, world: &World) -> anyhow::Result<()>;

    /// Prepare the chunk for block access.
    fn init_chunk(&mut self) -> anyhow::Result<()>;

    fn block_entities_mut(&mut self) -> &mut [BlockEntity];
}
