//! Minecraft Anvil region container (.mca).
//!
//! Region files hold up to 32x32 chunks:
//! - Bytes 0-4095: location table (1024 entries x 4 bytes, `[offset:3][count:1]`)
//! - Bytes 4096-8191: timestamp table (1024 entries x 4 bytes)
//! - Bytes 8192+: chunk blobs `[length:4][compression:1][data...]`, padded to whole sectors

mod region_file;

pub use region_file::RegionFile;

use std::io::{Read, Write};
use flate2::write::ZlibEncoder;
use flate2::Compression as ZlibCompression;

pub const SECTOR_BYTES: u64 = 4096; // minecraft uses 4096 bytes per sector
pub const HEADER_BYTES: u64 = 8192; // header is 8192 bytes (2 sectors 8kb)

/// Number of chunks per region dimension.
pub const REGION_SIZE: u8 = 32;

/// Number of chunk slots in one region file.
pub const CHUNKS_PER_REGION: usize = 1024;

/// The location table stores the sector count in a single byte.
pub const MAX_CHUNK_SECTORS: u64 = 255;

/// Linear slot of a chunk inside the header tables (0-1023).
#[inline]
pub fn chunk_index(rel_x: u8, rel_z: u8) -> usize {
    // Formula: x + z * 32
    (rel_x as usize & 31) + (rel_z as usize & 31) * 32
}

/// Compression type byte of a chunk blob, as written by vanilla Minecraft
pub mod compression {
    pub const GZIP: u8 = 1;
    pub const ZLIB: u8 = 2;
    pub const NONE: u8 = 3;
    pub const LZ4: u8 = 4;
}

/// Compress raw NBT with Zlib and wrap it as `[length:4][type:1][data...]`.
pub fn compress_and_wrap_chunk(nbt_data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), ZlibCompression::default());
    encoder.write_all(nbt_data)?;
    let compressed = encoder.finish()?;

    let total_len = (compressed.len() + 1) as u32; // +1 byte for Type
    let mut chunk_blob = Vec::with_capacity(5 + compressed.len());
    chunk_blob.extend_from_slice(&total_len.to_be_bytes()); // Big Endian Length
    chunk_blob.push(compression::ZLIB);
    chunk_blob.extend_from_slice(&compressed);
    Ok(chunk_blob)
}

/// Unwrap and decompress a chunk blob.
/// Supports GZip (1), ZLib (2), None (3), and LZ4 (4).
pub fn unwrap_and_decompress_chunk(chunk_blob: &[u8]) -> anyhow::Result<Vec<u8>> {
    if chunk_blob.len() < 5 {
        anyhow::bail!("Chunk blob too short");
    }

    // Parse header: [Length: 4 bytes][Type: 1 byte][Data...]
    let length = u32::from_be_bytes([chunk_blob[0], chunk_blob[1], chunk_blob[2], chunk_blob[3]]) as usize;
    if length == 0 || 4 + length > chunk_blob.len() {
        anyhow::bail!("Chunk length {} does not fit blob of {} bytes", length, chunk_blob.len());
    }
    let compression_type = chunk_blob[4];
    let compressed_data = &chunk_blob[5..4 + length];

    match compression_type {
        compression::ZLIB => {
            let mut decoder = flate2::read::ZlibDecoder::new(compressed_data);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(decompressed)
        },
        compression::GZIP => {
            let mut decoder = flate2::read::GzDecoder::new(compressed_data);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(decompressed)
        },
        compression::NONE => {
            Ok(compressed_data.to_vec())
        },
        compression::LZ4 => {
            // LZ4 using same library as Pumpkin (lz4-java-wrc)
            let mut decoder = lz4_java_wrc::Lz4BlockInput::new(compressed_data);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(decompressed)
        },
        // High bit marks chunks stored in external .mcc files
        t if t & 0x80 != 0 => anyhow::bail!("External chunk storage (type {}) is not supported", t),
        _ => anyhow::bail!("Unknown compression type: {}", compression_type),
    }
}
