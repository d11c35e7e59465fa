//! Moves a chunk's content from the 256-tall range into the 384-tall range.

use anyhow::Context;

use crate::chunk::{BlockState, ChunkAccess, Layer, HEIGHT_SHIFT, MIN_Y};

/// What one shift moved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShiftStats {
    /// Cells copied upward (each cell carries both layers).
    pub blocks_moved: u64,
    pub block_entities_moved: u64,
}

/// Shift every block and block entity of `chunk` up by [`HEIGHT_SHIFT`].
///
/// Each column is walked from its highest occupied Y down to [`MIN_Y`]: both
/// layers are copied 64 blocks up and the source cell is cleared to air.
/// Walking downwards matters, since the destination of a low cell is the
/// source of a higher one that has to be moved first.
///
/// Block entity Y values are raised by the same amount without clamping.
///
/// This is not idempotent. Running it on an already shifted chunk moves
/// everything again, so callers must apply it exactly once per chunk.
pub fn shift_chunk<C: ChunkAccess + ?Sized>(chunk: &mut C) -> anyhow::Result<ShiftStats> {
    let mut stats = ShiftStats::default();

    for dx in 0..16u8 {
        for dz in 0..16u8 {
            stats.blocks_moved += shift_column(chunk, dx, dz)?;
        }
    }

    for entity in chunk.block_entities_mut() {
        entity.y += HEIGHT_SHIFT;
        stats.block_entities_moved += 1;
    }

    Ok(stats)
}

fn shift_column<C: ChunkAccess + ?Sized>(chunk: &mut C, dx: u8, dz: u8) -> anyhow::Result<u64> {
    let top = chunk.highest_occupied_y(dx, dz, false);
    let mut moved = 0;

    // Empty columns report a top below MIN_Y and skip the loop entirely
    for y in (MIN_Y..=top).rev() {
        for layer in Layer::ALL {
            let state = chunk.block_state(dx, y, dz, layer);
            chunk
                .set_block_state(dx, y + HEIGHT_SHIFT, dz, layer, state)
                .with_context(|| format!("moving block ({}, {}, {}) to Y={}", dx, y, dz, y + HEIGHT_SHIFT))?;
        }
        for layer in Layer::ALL {
            chunk
                .set_block_state(dx, y, dz, layer, BlockState::air())
                .with_context(|| format!("clearing block ({}, {}, {})", dx, y, dz))?;
        }
        moved += 1;
    }

    Ok(moved)
}
