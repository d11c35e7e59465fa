//! Paletted block storage of one 16x16x16 section.
//!
//! Minecraft uses "Paletted Storage". Instead of storing 4096 block states,
//! it stores a list of unique states (palette) plus packed indices into it.

use std::collections::{BTreeMap, HashMap};

use fastnbt::{LongArray, Value};

use crate::chunk::BlockState;

/// Cells per section.
pub const SECTION_VOLUME: usize = 4096;

/// Index of a cell inside a section, `(y * 16 + z) * 16 + x`.
#[inline]
pub fn block_index(x: u8, local_y: u8, z: u8) -> usize {
    ((local_y as usize & 15) * 16 + (z as usize & 15)) * 16 + (x as usize & 15)
}

/// Bits per packed index; sections never use fewer than 4.
fn bits_per_entry(palette_len: usize) -> u32 {
    let needed = usize::BITS - palette_len.saturating_sub(1).leading_zeros();
    needed.max(4)
}

/// Unpack indices. Entries do NOT span across long boundaries.
pub fn unpack_indices(packed: &[i64], palette_len: usize) -> anyhow::Result<Vec<u16>> {
    let bits = bits_per_entry(palette_len);
    let per_long = (64 / bits) as usize;
    let expected_longs = SECTION_VOLUME.div_ceil(per_long);
    if packed.len() < expected_longs {
        anyhow::bail!("Block data has {} longs, {} needed for {} bits per entry", packed.len(), expected_longs, bits);
    }

    let mask = (1u64 << bits) - 1;
    let mut indices = Vec::with_capacity(SECTION_VOLUME);
    for i in 0..SECTION_VOLUME {
        let long = packed[i / per_long] as u64;
        let index = (long >> ((i % per_long) as u32 * bits)) & mask;
        if index as usize >= palette_len {
            anyhow::bail!("Palette index {} out of range for palette of {}", index, palette_len);
        }
        indices.push(index as u16);
    }
    Ok(indices)
}

/// Pack indices. Entries do NOT span across long boundaries.
pub fn pack_indices(indices: &[u16], palette_len: usize) -> Vec<i64> {
    let bits = bits_per_entry(palette_len);
    let per_long = (64 / bits) as usize;
    let mut packed = vec![0i64; SECTION_VOLUME.div_ceil(per_long)];

    for (i, &index) in indices.iter().enumerate().take(SECTION_VOLUME) {
        let shift = (i % per_long) as u32 * bits;
        packed[i / per_long] |= ((index as u64) << shift) as i64;
    }
    packed
}

/// One decoded block layer of a section.
#[derive(Debug, Clone, PartialEq)]
pub struct PalettedBlocks {
    palette: Vec<BlockState>,
    indices: Vec<u16>,
}

impl PalettedBlocks {
    /// A section where every cell holds `state`.
    pub fn filled(state: BlockState) -> Self {
        Self {
            palette: vec![state],
            indices: vec![0; SECTION_VOLUME],
        }
    }

    pub fn get(&self, index: usize) -> &BlockState {
        &self.palette[self.indices[index] as usize]
    }

    pub fn set(&mut self, index: usize, state: BlockState) {
        let palette_index = match self.palette.iter().position(|s| *s == state) {
            Some(i) => i,
            None => {
                self.palette.push(state);
                self.palette.len() - 1
            }
        };
        self.indices[index] = palette_index as u16;
    }

    pub fn is_all_air(&self) -> bool {
        self.indices.iter().all(|&i| self.palette[i as usize].is_air())
    }

    /// Decode a `{ palette: [...], data: [L; ...] }` compound.
    pub fn from_nbt(value: &Value) -> anyhow::Result<Self> {
        let Value::Compound(container) = value else {
            anyhow::bail!("Block states are not a compound");
        };
        let Some(Value::List(entries)) = container.get("palette") else {
            anyhow::bail!("Block states have no palette");
        };

        let palette = entries.iter().map(block_state_from_nbt).collect::<anyhow::Result<Vec<_>>>()?;
        if palette.is_empty() {
            anyhow::bail!("Block palette is empty");
        }

        let indices = if palette.len() == 1 {
            // Single entry palette, no data needed
            vec![0; SECTION_VOLUME]
        } else {
            match container.get("data") {
                Some(Value::LongArray(data)) => unpack_indices(data, palette.len())?,
                _ => anyhow::bail!("Block states with {} palette entries have no data", palette.len()),
            }
        };

        Ok(Self { palette, indices })
    }

    /// Encode back to NBT, dropping palette entries no cell uses.
    pub fn to_nbt(&self) -> Value {
        let mut used = vec![false; self.palette.len()];
        for &i in &self.indices {
            used[i as usize] = true;
        }

        let mut remap = vec![0u16; self.palette.len()];
        let mut palette = Vec::new();
        for (old, state) in self.palette.iter().enumerate() {
            if used[old] {
                remap[old] = palette.len() as u16;
                palette.push(state);
            }
        }

        let mut container = HashMap::new();
        container.insert(
            "palette".to_string(),
            Value::List(palette.iter().map(|s| block_state_to_nbt(s)).collect()),
        );
        if palette.len() > 1 {
            let indices: Vec<u16> = self.indices.iter().map(|&i| remap[i as usize]).collect();
            container.insert(
                "data".to_string(),
                Value::LongArray(LongArray::new(pack_indices(&indices, palette.len()))),
            );
        }
        Value::Compound(container)
    }
}

fn block_state_from_nbt(value: &Value) -> anyhow::Result<BlockState> {
    let Value::Compound(entry) = value else {
        anyhow::bail!("Palette entry is not a compound");
    };
    let Some(Value::String(name)) = entry.get("Name") else {
        anyhow::bail!("Palette entry has no Name");
    };

    let mut properties = BTreeMap::new();
    if let Some(Value::Compound(props)) = entry.get("Properties") {
        for (key, value) in props {
            if let Value::String(v) = value {
                properties.insert(key.clone(), v.clone());
            }
        }
    }
    Ok(BlockState { name: name.clone(), properties })
}

fn block_state_to_nbt(state: &BlockState) -> Value {
    let mut entry = HashMap::new();
    entry.insert("Name".to_string(), Value::String(state.name.clone()));
    if !state.properties.is_empty() {
        let props = state
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        entry.insert("Properties".to_string(), Value::Compound(props));
    }
    Value::Compound(entry)
}
