//! Migration of a single region file.

use std::path::{Path, PathBuf};
use std::time::Instant;

use levelshift_metrics::MigrationMetrics;

use crate::chunk::ChunkAccess;
use crate::coordinator::CancelToken;
use crate::coords::{region_of, RegionPos, REGION_SIZE};
use crate::error::MigrationError;
use crate::shift::shift_chunk;
use crate::storage::{RegionAccessor, StorageProvider};
use crate::world::World;

/// How one discovered file ended up.
#[derive(Debug)]
pub enum RegionOutcome {
    /// The chunk loop ran to the end and the region closed cleanly.
    Migrated { region: RegionPos, stats: RegionStats },
    /// The file name does not encode region coordinates.
    Skipped { file: PathBuf },
    Failed(MigrationError),
}

/// Per-region chunk tally.
#[derive(Debug, Default)]
pub struct RegionStats {
    pub chunks_migrated: usize,
    pub chunks_absent: usize,
    /// Chunks that failed on their own; their siblings were still migrated.
    pub chunk_failures: Vec<MigrationError>,
}

/// Everything a worker shares with its siblings for one run.
pub struct RegionWorker<'a, P> {
    pub provider: &'a P,
    pub world: &'a World,
    pub metrics: &'a MigrationMetrics,
    pub cancel: &'a CancelToken,
    /// Files discovered for the run; the denominator of progress messages.
    pub total_files: usize,
}

impl<P: StorageProvider> RegionWorker<'_, P> {
    /// Migrate every chunk of the region file at `path`.
    ///
    /// Never fails as a whole: problems are logged and returned as the outcome.
    pub fn migrate(&self, path: &Path) -> RegionOutcome {
        let region = match region_of(path) {
            Some(region) => region,
            None => {
                log::debug!("Skipping {}: name does not encode region coordinates", path.display());
                self.metrics.record_skipped_file();
                return RegionOutcome::Skipped { file: path.to_path_buf() };
            }
        };

        match self.migrate_region(region) {
            Ok(stats) => {
                let completed = self.metrics.record_region_completed();
                log::info!(
                    "Converting... completed: {:.2}%",
                    self.metrics.progress_percent(completed, self.total_files)
                );
                log::debug!(
                    "Region {}: {} chunks migrated, {} absent, {} failed",
                    region, stats.chunks_migrated, stats.chunks_absent, stats.chunk_failures.len()
                );
                RegionOutcome::Migrated { region, stats }
            }
            Err(e) if e.is_cancelled() => {
                log::warn!("{}", e);
                RegionOutcome::Failed(e)
            }
            Err(e) => {
                log::error!("{}", e.chain());
                self.metrics.record_region_failed();
                RegionOutcome::Failed(e)
            }
        }
    }

    fn migrate_region(&self, region: RegionPos) -> Result<RegionStats, MigrationError> {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled { region });
        }

        let mut accessor = self
            .provider
            .open_region(region)
            .map_err(|e| MigrationError::RegionOpen { region, source: e.into() })?;

        let result = self.migrate_chunks(&mut accessor, region);
        // Close whatever happened in the loop so the file handle is released
        let closed = accessor
            .close()
            .map_err(|e| MigrationError::RegionClose { region, source: e.into() });

        match (result, closed) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(close_err)) => {
                log::error!("{}", close_err.chain());
                Err(e)
            }
        }
    }

    fn migrate_chunks(&self, accessor: &mut P::Region, region: RegionPos) -> Result<RegionStats, MigrationError> {
        let mut stats = RegionStats::default();

        for chunk_x in 0..REGION_SIZE as u8 {
            for chunk_z in 0..REGION_SIZE as u8 {
                if self.cancel.is_cancelled() {
                    return Err(MigrationError::Cancelled { region });
                }

                match self.migrate_chunk(accessor, region, chunk_x, chunk_z) {
                    Ok(true) => stats.chunks_migrated += 1,
                    Ok(false) => stats.chunks_absent += 1,
                    Err(e) => {
                        log::error!("{}", e.chain());
                        self.metrics.record_chunk_failed();
                        stats.chunk_failures.push(e);
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Load, shift and store one chunk. Returns false if the chunk does not exist.
    fn migrate_chunk(
        &self,
        accessor: &mut P::Region,
        region: RegionPos,
        chunk_x: u8,
        chunk_z: u8,
    ) -> Result<bool, MigrationError> {
        let start = Instant::now();
        let chunk = accessor
            .read_chunk(chunk_x, chunk_z)
            .map_err(|e| MigrationError::ChunkRead { region, chunk_x, chunk_z, source: e.into() })?;
        self.metrics.record_load(start.elapsed());

        let Some(mut chunk) = chunk else {
            log::trace!("Chunk ({}, {}) of region {} not generated", chunk_x, chunk_z, region);
            self.metrics.record_chunk_absent();
            return Ok(false);
        };

        let start = Instant::now();
        let shifted = chunk
            .backward_compatibility_update(self.world)
            .and_then(|()| chunk.init_chunk())
            .and_then(|()| shift_chunk(&mut chunk))
            .map_err(|e| MigrationError::Transform { region, chunk_x, chunk_z, source: e.into() })?;
        self.metrics.record_shift(start.elapsed(), shifted.blocks_moved, shifted.block_entities_moved);

        let start = Instant::now();
        accessor
            .write_chunk(chunk_x, chunk_z, &chunk)
            .map_err(|e| MigrationError::ChunkWrite { region, chunk_x, chunk_z, source: e.into() })?;
        self.metrics.record_save(start.elapsed());

        Ok(true)
    }
}
