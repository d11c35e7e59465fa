//! Chunk NBT as stored in region files.
//!
//! The whole tree is kept as a `fastnbt::Value` so tags this tool does not
//! understand (heightmaps, ticks, structures, ...) are written back untouched.

use std::collections::{BTreeMap, HashMap};

use fastnbt::Value;

use super::palette::{block_index, PalettedBlocks};
use crate::chunk::{is_valid_y, BlockEntity, BlockState, ChunkAccess, Layer, MAX_Y, MIN_Y};
use crate::world::World;

/// Section Y of the lowest section in the 384-tall range.
pub const MIN_SECTION: i8 = (MIN_Y >> 4) as i8;

/// Section Y of the highest section in the 384-tall range.
pub const MAX_SECTION: i8 = (MAX_Y >> 4) as i8;

const BLOCK_STATES: &str = "block_states";
/// Secondary layer container, same format as `block_states`.
const LAYER1_BLOCK_STATES: &str = "layer1_block_states";

#[derive(Debug, Clone, PartialEq)]
struct Section {
    layers: [Option<PalettedBlocks>; 2],
    /// Biomes, light and anything else stored next to the blocks.
    rest: HashMap<String, Value>,
}

impl Section {
    fn empty() -> Self {
        Self {
            layers: [None, None],
            rest: HashMap::new(),
        }
    }
}

/// Blocks and block entities decoded by [`ChunkAccess::init_chunk`].
#[derive(Debug, Clone, PartialEq)]
struct Decoded {
    sections: BTreeMap<i8, Section>,
    block_entities: Vec<BlockEntity>,
}

/// A chunk read from a region file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnvilChunk {
    root: HashMap<String, Value>,
    decoded: Option<Decoded>,
}

impl AnvilChunk {
    /// Parse raw (decompressed) chunk NBT.
    pub fn from_nbt(nbt_data: &[u8]) -> anyhow::Result<Self> {
        match fastnbt::from_bytes::<Value>(nbt_data)? {
            Value::Compound(root) => Ok(Self { root, decoded: None }),
            _ => anyhow::bail!("NBT Root is not a Compound"),
        }
    }

    /// Serialize back to raw NBT, re-encoding blocks if they were decoded.
    pub fn to_nbt(&self) -> anyhow::Result<Vec<u8>> {
        let mut root = self.root.clone();
        if let Some(decoded) = &self.decoded {
            let sections = decoded.sections.iter().map(|(y, s)| encode_section(*y, s)).collect();
            root.insert("sections".to_string(), Value::List(sections));
            let entities = decoded.block_entities.iter().map(encode_block_entity).collect();
            root.insert("block_entities".to_string(), Value::List(entities));
        }
        Ok(fastnbt::to_bytes(&Value::Compound(root))?)
    }

    /// Absolute chunk coordinates from `xPos`/`zPos`.
    pub fn position(&self) -> anyhow::Result<(i32, i32)> {
        let x = int_tag(&self.root, "xPos")?;
        let z = int_tag(&self.root, "zPos")?;
        Ok((x, z))
    }

    /// Lowest section Y recorded by the chunk, if any.
    pub fn min_section(&self) -> Option<i32> {
        int_tag(&self.root, "yPos").ok()
    }

    fn section_mut(&mut self, section_y: i8) -> anyhow::Result<&mut Section> {
        let decoded = self.decoded.as_mut().ok_or_else(|| anyhow::anyhow!("Chunk blocks were never initialised"))?;
        Ok(decoded.sections.entry(section_y).or_insert_with(Section::empty))
    }
}

impl ChunkAccess for AnvilChunk {
    fn highest_occupied_y(&self, dx: u8, dz: u8, include_air: bool) -> i32 {
        if include_air {
            return MAX_Y;
        }
        let Some(decoded) = &self.decoded else {
            return MIN_Y - 1;
        };

        for (&section_y, section) in decoded.sections.range(MIN_SECTION..=MAX_SECTION).rev() {
            let Some(blocks) = &section.layers[Layer::Primary.index()] else {
                continue;
            };
            for local_y in (0..16u8).rev() {
                if !blocks.get(block_index(dx, local_y, dz)).is_air() {
                    return section_y as i32 * 16 + local_y as i32;
                }
            }
        }
        MIN_Y - 1
    }

    fn block_state(&self, dx: u8, y: i32, dz: u8, layer: Layer) -> BlockState {
        if !is_valid_y(y) {
            return BlockState::air();
        }
        self.decoded
            .as_ref()
            .and_then(|d| d.sections.get(&((y >> 4) as i8)))
            .and_then(|s| s.layers[layer.index()].as_ref())
            .map(|blocks| blocks.get(block_index(dx, (y & 15) as u8, dz)).clone())
            .unwrap_or_default()
    }

    fn set_block_state(&mut self, dx: u8, y: i32, dz: u8, layer: Layer, state: BlockState) -> anyhow::Result<()> {
        if dx > 15 || dz > 15 || !is_valid_y(y) {
            anyhow::bail!("Block ({}, {}, {}) is outside the chunk", dx, y, dz);
        }
        let section = self.section_mut((y >> 4) as i8)?;
        let slot = &mut section.layers[layer.index()];
        if slot.is_none() {
            if state == BlockState::air() {
                // Nothing stored means air already
                return Ok(());
            }
            *slot = Some(PalettedBlocks::filled(BlockState::air()));
        }
        if let Some(blocks) = slot {
            blocks.set(block_index(dx, (y & 15) as u8, dz), state);
        }
        Ok(())
    }

    /// Legacy 256-tall chunks start their sections at Y=0; mark them as
    /// starting at the bottom of the 384-tall range. Pre-1.18 layouts that
    /// nest everything under `Level` are rejected.
    fn backward_compatibility_update(&mut self, world: &World) -> anyhow::Result<()> {
        if self.root.contains_key("Level") {
            anyhow::bail!("Chunk uses the pre-1.18 'Level' layout, which is not supported");
        }
        match self.min_section() {
            Some(y) if y <= MIN_SECTION as i32 => {}
            _ => {
                log::trace!("Upgrading legacy chunk {:?} of world '{}'", self.position().ok(), world.name());
                self.root.insert("yPos".to_string(), Value::Int(MIN_SECTION as i32));
            }
        }
        Ok(())
    }

    /// Decode every section's palettes and the block entity list.
    /// Calling it again keeps the already decoded state.
    fn init_chunk(&mut self) -> anyhow::Result<()> {
        if self.decoded.is_some() {
            return Ok(());
        }

        let mut sections = BTreeMap::new();
        if let Some(raw) = self.root.remove("sections") {
            let Value::List(raw) = raw else {
                anyhow::bail!("'sections' is not a list");
            };
            for value in raw {
                let (y, section) = decode_section(value)?;
                sections.insert(y, section);
            }
        }

        let mut block_entities = Vec::new();
        if let Some(raw) = self.root.remove("block_entities") {
            let Value::List(raw) = raw else {
                anyhow::bail!("'block_entities' is not a list");
            };
            for value in raw {
                block_entities.push(decode_block_entity(value)?);
            }
        }

        self.decoded = Some(Decoded { sections, block_entities });
        Ok(())
    }

    fn block_entities_mut(&mut self) -> &mut [BlockEntity] {
        match &mut self.decoded {
            Some(decoded) => &mut decoded.block_entities,
            None => &mut [],
        }
    }
}

fn int_tag(compound: &HashMap<String, Value>, key: &str) -> anyhow::Result<i32> {
    compound
        .get(key)
        .and_then(numeric)
        .map(|v| v as i32)
        .ok_or_else(|| anyhow::anyhow!("'{}' is missing or not a number", key))
}

fn numeric(value: &Value) -> Option<i64> {
    match value {
        Value::Byte(v) => Some(*v as i64),
        Value::Short(v) => Some(*v as i64),
        Value::Int(v) => Some(*v as i64),
        Value::Long(v) => Some(*v),
        _ => None,
    }
}

fn decode_section(value: Value) -> anyhow::Result<(i8, Section)> {
    let Value::Compound(mut rest) = value else {
        anyhow::bail!("Section is not a compound");
    };
    let y = rest
        .remove("Y")
        .as_ref()
        .and_then(numeric)
        .ok_or_else(|| anyhow::anyhow!("Section has no Y"))? as i8;

    let mut layers = [None, None];
    for (layer, key) in [(Layer::Primary, BLOCK_STATES), (Layer::Secondary, LAYER1_BLOCK_STATES)] {
        if let Some(container) = rest.remove(key) {
            let blocks = PalettedBlocks::from_nbt(&container)
                .map_err(|e| e.context(format!("section {} {}", y, key)))?;
            layers[layer.index()] = Some(blocks);
        }
    }
    Ok((y, Section { layers, rest }))
}

fn encode_section(y: i8, section: &Section) -> Value {
    let mut compound = section.rest.clone();
    compound.insert("Y".to_string(), Value::Byte(y));

    // Vanilla expects block_states on every section within the range
    let primary = section.layers[Layer::Primary.index()]
        .as_ref()
        .map(PalettedBlocks::to_nbt)
        .unwrap_or_else(|| PalettedBlocks::filled(BlockState::air()).to_nbt());
    compound.insert(BLOCK_STATES.to_string(), primary);

    if let Some(secondary) = &section.layers[Layer::Secondary.index()] {
        if !secondary.is_all_air() {
            compound.insert(LAYER1_BLOCK_STATES.to_string(), secondary.to_nbt());
        }
    }
    Value::Compound(compound)
}

fn decode_block_entity(value: Value) -> anyhow::Result<BlockEntity> {
    let Value::Compound(mut data) = value else {
        anyhow::bail!("Block entity is not a compound");
    };
    let id = match data.remove("id") {
        Some(Value::String(id)) => id,
        _ => String::new(),
    };
    let x = int_tag(&data, "x")?;
    let y = int_tag(&data, "y")?;
    let z = int_tag(&data, "z")?;
    for key in ["x", "y", "z"] {
        data.remove(key);
    }
    Ok(BlockEntity { id, x, y, z, data })
}

fn encode_block_entity(entity: &BlockEntity) -> Value {
    let mut compound = entity.data.clone();
    if !entity.id.is_empty() {
        compound.insert("id".to_string(), Value::String(entity.id.clone()));
    }
    compound.insert("x".to_string(), Value::Int(entity.x));
    compound.insert("y".to_string(), Value::Int(entity.y));
    compound.insert("z".to_string(), Value::Int(entity.z));
    Value::Compound(compound)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::shift::shift_chunk;

    /// Build legacy chunk NBT: stone from Y=0 up to `top` in every column,
    /// a chest at (1, top, 1) and water in the secondary layer at (0, 0, 0).
    pub(crate) fn legacy_chunk_nbt(chunk_x: i32, chunk_z: i32, top: i32) -> Vec<u8> {
        let mut chunk = AnvilChunk {
            root: HashMap::from([
                ("xPos".to_string(), Value::Int(chunk_x)),
                ("zPos".to_string(), Value::Int(chunk_z)),
                ("Status".to_string(), Value::String("minecraft:full".to_string())),
                ("DataVersion".to_string(), Value::Int(2730)),
            ]),
            decoded: Some(Decoded { sections: BTreeMap::new(), block_entities: Vec::new() }),
        };
        for y in 0..=top {
            for dx in 0..16 {
                for dz in 0..16 {
                    chunk.set_block_state(dx, y, dz, Layer::Primary, BlockState::new("minecraft:stone")).unwrap();
                }
            }
        }
        chunk.set_block_state(0, 0, 0, Layer::Secondary, BlockState::new("minecraft:water")).unwrap();
        if let Some(decoded) = &mut chunk.decoded {
            let mut chest = BlockEntity::new("minecraft:chest", chunk_x * 16 + 1, top, chunk_z * 16 + 1);
            chest.data.insert("CustomName".to_string(), Value::String("loot".to_string()));
            decoded.block_entities.push(chest);
        }
        chunk.to_nbt().unwrap()
    }

    fn prepared(nbt: &[u8]) -> AnvilChunk {
        let mut chunk = AnvilChunk::from_nbt(nbt).unwrap();
        chunk.backward_compatibility_update(&World::new("w", "/tmp/w")).unwrap();
        chunk.init_chunk().unwrap();
        chunk
    }

    #[test]
    fn test_decode_legacy_chunk() {
        let chunk = prepared(&legacy_chunk_nbt(3, -4, 20));
        assert_eq!(chunk.position().unwrap(), (3, -4));
        assert_eq!(chunk.min_section(), Some(-4));
        assert_eq!(chunk.highest_occupied_y(5, 5, false), 20);
        assert_eq!(chunk.highest_occupied_y(5, 5, true), MAX_Y);
        assert_eq!(chunk.block_state(0, 0, 0, Layer::Secondary), BlockState::new("minecraft:water"));
        assert!(chunk.block_state(0, -10, 0, Layer::Primary).is_air());
    }

    #[test]
    fn test_shift_survives_encoding() {
        let mut chunk = prepared(&legacy_chunk_nbt(0, 0, 20));
        shift_chunk(&mut chunk).unwrap();

        let reloaded = prepared(&chunk.to_nbt().unwrap());
        assert_eq!(reloaded.highest_occupied_y(7, 7, false), 84);
        assert_eq!(reloaded.block_state(7, 64, 7, Layer::Primary), BlockState::new("minecraft:stone"));
        assert!(reloaded.block_state(7, 63, 7, Layer::Primary).is_air());
        assert!(reloaded.block_state(7, 0, 7, Layer::Primary).is_air());
        assert_eq!(reloaded.block_state(0, 64, 0, Layer::Secondary), BlockState::new("minecraft:water"));
        assert!(reloaded.block_state(0, 0, 0, Layer::Secondary).is_air());

        let mut reloaded = reloaded;
        let chest = &reloaded.block_entities_mut()[0];
        assert_eq!((chest.id.as_str(), chest.y), ("minecraft:chest", 84));
        assert_eq!(chest.data.get("CustomName"), Some(&Value::String("loot".to_string())));
    }

    #[test]
    fn test_unknown_tags_are_kept() {
        let chunk = prepared(&legacy_chunk_nbt(1, 1, 2));
        let Value::Compound(root) = fastnbt::from_bytes::<Value>(&chunk.to_nbt().unwrap()).unwrap() else {
            panic!("root is not a compound");
        };
        assert_eq!(root.get("Status"), Some(&Value::String("minecraft:full".to_string())));
        assert_eq!(root.get("DataVersion"), Some(&Value::Int(2730)));
    }

    #[test]
    fn test_writes_need_init() {
        let mut chunk = AnvilChunk::from_nbt(&legacy_chunk_nbt(0, 0, 1)).unwrap();
        assert!(chunk.set_block_state(0, 0, 0, Layer::Primary, BlockState::new("minecraft:stone")).is_err());
        assert_eq!(chunk.highest_occupied_y(0, 0, false), MIN_Y - 1);
        assert!(chunk.block_entities_mut().is_empty());
    }

    #[test]
    fn test_level_layout_is_rejected() {
        let root = Value::Compound(HashMap::from([("Level".to_string(), Value::Compound(HashMap::new()))]));
        let mut chunk = AnvilChunk::from_nbt(&fastnbt::to_bytes(&root).unwrap()).unwrap();
        assert!(chunk.backward_compatibility_update(&World::new("w", "/tmp/w")).is_err());
    }
}
