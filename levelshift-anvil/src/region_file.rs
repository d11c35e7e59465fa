//! Read/write access to one region file on disk.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;

use crate::{
    chunk_index, compress_and_wrap_chunk, unwrap_and_decompress_chunk, CHUNKS_PER_REGION,
    HEADER_BYTES, MAX_CHUNK_SECTORS, SECTOR_BYTES,
};

/// Header sectors; no chunk may start below this.
const FIRST_DATA_SECTOR: u32 = (HEADER_BYTES / SECTOR_BYTES) as u32;

/// One location table entry, stored as `[offset:3][count:1]` big endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Location {
    sector: u32,
    count: u8,
}

impl Location {
    fn from_raw(raw: u32) -> Self {
        Self {
            sector: raw >> 8,
            count: (raw & 0xFF) as u8,
        }
    }

    fn to_raw(self) -> u32 {
        (self.sector << 8) | self.count as u32
    }

    fn is_empty(&self) -> bool {
        self.sector == 0 || self.count == 0
    }

    fn end(&self) -> u32 {
        self.sector + self.count as u32
    }
}

/// An open region file.
///
/// The header is read once on open and kept in memory. Chunk writes go
/// straight to disk; the header is only written back by [`RegionFile::close`].
pub struct RegionFile {
    path: PathBuf,
    file: File,
    locations: Vec<Location>,
    timestamps: Vec<u32>,
    // First sector past everything in use; relocated chunks are appended here.
    end_sector: u32,
    dirty: bool,
}

impl RegionFile {
    /// Open a region file, creating an empty one if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open region file {}", path.display()))?;

        // If necessary, expand the file length to the length of the header.
        let file_len = file.metadata()?.len();
        if file_len < HEADER_BYTES {
            file.set_len(HEADER_BYTES)?;
        }

        let mut header = vec![0u8; HEADER_BYTES as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)
            .with_context(|| format!("Failed to read header of {}", path.display()))?;

        let mut locations = Vec::with_capacity(CHUNKS_PER_REGION);
        let mut timestamps = Vec::with_capacity(CHUNKS_PER_REGION);
        for i in 0..CHUNKS_PER_REGION {
            locations.push(Location::from_raw(read_u32(&header, i * 4)));
            timestamps.push(read_u32(&header, SECTOR_BYTES as usize + i * 4));
        }

        let file_sectors = file_len.max(HEADER_BYTES).div_ceil(SECTOR_BYTES) as u32;
        let end_sector = locations
            .iter()
            .filter(|l| !l.is_empty())
            .map(Location::end)
            .max()
            .unwrap_or(FIRST_DATA_SECTOR)
            .max(file_sectors);

        Ok(Self {
            path,
            file,
            locations,
            timestamps,
            end_sector,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the location table has an entry for this chunk.
    pub fn has_chunk(&self, rel_x: u8, rel_z: u8) -> bool {
        !self.locations[chunk_index(rel_x, rel_z)].is_empty()
    }

    /// Last-modified timestamp (unix seconds) recorded for a chunk.
    pub fn timestamp(&self, rel_x: u8, rel_z: u8) -> u32 {
        self.timestamps[chunk_index(rel_x, rel_z)]
    }

    /// Read and decompress a chunk. Returns the raw NBT, or `None` if the slot is empty.
    pub fn read_chunk(&mut self, rel_x: u8, rel_z: u8) -> anyhow::Result<Option<Vec<u8>>> {
        let location = self.locations[chunk_index(rel_x, rel_z)];
        if location.is_empty() {
            return Ok(None);
        }
        if location.sector < FIRST_DATA_SECTOR {
            anyhow::bail!("Chunk ({}, {}) points into the header (sector {})", rel_x, rel_z, location.sector);
        }

        self.file.seek(SeekFrom::Start(location.sector as u64 * SECTOR_BYTES))?;
        let mut length_bytes = [0u8; 4];
        self.file.read_exact(&mut length_bytes)
            .with_context(|| format!("Chunk ({}, {}) lies past the end of the file", rel_x, rel_z))?;

        let length = u32::from_be_bytes(length_bytes) as u64;
        if length == 0 {
            // Sector reserved but nothing stored
            return Ok(None);
        }
        let maximum_length = location.count as u64 * SECTOR_BYTES - 4;
        if length > maximum_length {
            anyhow::bail!("Chunk ({}, {}) of length {} exceeds maximum {}", rel_x, rel_z, length, maximum_length);
        }

        let mut blob = vec![0u8; 4 + length as usize];
        blob[..4].copy_from_slice(&length_bytes);
        self.file.read_exact(&mut blob[4..])?;

        unwrap_and_decompress_chunk(&blob).map(Some)
    }

    /// Compress and store a chunk's raw NBT.
    ///
    /// The chunk is rewritten in place when it still fits its old sectors,
    /// otherwise it is appended at the end of the file.
    pub fn write_chunk(&mut self, rel_x: u8, rel_z: u8, nbt_data: &[u8]) -> anyhow::Result<()> {
        let mut blob = compress_and_wrap_chunk(nbt_data)?;
        let sectors = (blob.len() as u64).div_ceil(SECTOR_BYTES);
        if sectors > MAX_CHUNK_SECTORS {
            anyhow::bail!("Chunk ({}, {}) needs {} sectors, region files allow {}", rel_x, rel_z, sectors, MAX_CHUNK_SECTORS);
        }
        blob.resize((sectors * SECTOR_BYTES) as usize, 0);

        let index = chunk_index(rel_x, rel_z);
        let old = self.locations[index];
        let sector = if !old.is_empty() && old.sector >= FIRST_DATA_SECTOR && sectors <= old.count as u64 {
            old.sector
        } else {
            let sector = self.end_sector;
            self.end_sector += sectors as u32;
            sector
        };

        self.file.seek(SeekFrom::Start(sector as u64 * SECTOR_BYTES))?;
        self.file.write_all(&blob)
            .with_context(|| format!("Failed to write chunk ({}, {}) to {}", rel_x, rel_z, self.path.display()))?;

        self.locations[index] = Location { sector, count: sectors as u8 };
        self.timestamps[index] = unix_now();
        self.dirty = true;
        Ok(())
    }

    /// Flush the header if any chunk changed. Safe to call more than once.
    pub fn close(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut header = vec![0u8; HEADER_BYTES as usize];
        for i in 0..CHUNKS_PER_REGION {
            write_u32(&mut header, i * 4, self.locations[i].to_raw());
            write_u32(&mut header, SECTOR_BYTES as usize + i * 4, self.timestamps[i]);
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.sync_data()
            .with_context(|| format!("Failed to sync {}", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_gets_empty_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut region = RegionFile::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_BYTES);
        assert!(!region.has_chunk(0, 0));
        assert_eq!(region.read_chunk(0, 0).unwrap(), None);
    }

    #[test]
    fn test_write_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut region = RegionFile::open(&path).unwrap();
        region.write_chunk(3, 7, b"chunk three seven").unwrap();
        region.write_chunk(31, 31, b"last slot").unwrap();
        region.close().unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        assert!(region.has_chunk(3, 7));
        assert!(region.timestamp(3, 7) > 0);
        assert_eq!(region.read_chunk(3, 7).unwrap().as_deref(), Some(&b"chunk three seven"[..]));
        assert_eq!(region.read_chunk(31, 31).unwrap().as_deref(), Some(&b"last slot"[..]));
        assert_eq!(region.read_chunk(0, 0).unwrap(), None);
        assert_eq!(std::fs::metadata(&path).unwrap().len() % SECTOR_BYTES, 0);
    }

    #[test]
    fn test_growing_chunk_does_not_clobber_neighbour() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut region = RegionFile::open(&path).unwrap();
        region.write_chunk(0, 0, b"small").unwrap();
        region.write_chunk(1, 0, b"neighbour").unwrap();

        // Incompressible payload larger than one sector forces a relocation
        let big: Vec<u8> = (0..20_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        region.write_chunk(0, 0, &big).unwrap();
        region.close().unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        assert_eq!(region.read_chunk(0, 0).unwrap(), Some(big));
        assert_eq!(region.read_chunk(1, 0).unwrap().as_deref(), Some(&b"neighbour"[..]));
    }

    #[test]
    fn test_location_into_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut header = vec![0u8; HEADER_BYTES as usize];
        write_u32(&mut header, 0, Location { sector: 1, count: 1 }.to_raw());
        std::fs::write(&path, &header).unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        assert!(region.read_chunk(0, 0).is_err());
    }
}
