//! Whole-world migration: discover region files and fan them out to workers.

use std::collections::hash_map::{Entry, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use levelshift_metrics::MigrationMetrics;
use rayon::prelude::*;
use serde::Serialize;

use crate::coords::{region_of, RegionPos};
use crate::error::MigrationError;
use crate::storage::StorageProvider;
use crate::worker::{RegionOutcome, RegionWorker};
use crate::world::{World, REGION_EXTENSION};

/// Cooperative stop signal, checked before each region and between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    /// Worker threads; `None` uses the available parallelism.
    pub threads: Option<usize>,
    pub cancel: CancelToken,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub world: String,
    /// Every `.mca` file found, including ones whose names did not parse.
    pub total_files: usize,
    pub regions_completed: usize,
    pub regions_failed: usize,
    pub files_skipped: usize,
    pub chunks_migrated: usize,
    pub chunks_failed: usize,
    pub blocks_moved: u64,
    pub block_entities_moved: u64,
    pub failed_regions: Vec<RegionPos>,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

impl MigrationReport {
    fn empty(world: &World) -> Self {
        Self::from_metrics(world, 0, &MigrationMetrics::default(), Vec::new(), false)
    }

    fn from_metrics(
        world: &World,
        total_files: usize,
        metrics: &MigrationMetrics,
        failed_regions: Vec<RegionPos>,
        cancelled: bool,
    ) -> Self {
        Self {
            world: world.name().to_string(),
            total_files,
            regions_completed: metrics.regions_completed.load(Ordering::Relaxed),
            regions_failed: metrics.regions_failed.load(Ordering::Relaxed),
            files_skipped: metrics.files_skipped.load(Ordering::Relaxed),
            chunks_migrated: metrics.chunks_migrated.load(Ordering::Relaxed),
            chunks_failed: metrics.chunks_failed.load(Ordering::Relaxed),
            blocks_moved: metrics.blocks_moved.load(Ordering::Relaxed),
            block_entities_moved: metrics.block_entities_moved.load(Ordering::Relaxed),
            failed_regions,
            cancelled,
            elapsed_secs: metrics.elapsed().as_secs_f64(),
        }
    }
}

/// List the regular files directly inside `dir` with the `.mca` extension.
///
/// A missing directory means the world has no regions yet and yields an empty list.
pub fn discover_region_files(dir: &Path) -> Result<Vec<PathBuf>, MigrationError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(MigrationError::Discovery { path: dir.to_path_buf(), source }),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrationError::Discovery { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        let is_region = path.extension().is_some_and(|ext| ext == REGION_EXTENSION);
        // Follows symlinks, like a plain "is this a file" check
        if is_region && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Pick one file per region so no region is migrated twice.
///
/// Returns the files to hand to workers (including names without coordinates,
/// which the worker skips) and the files naming an already claimed region.
/// The canonical `r.<x>.<z>.mca` name wins a claim, otherwise the first in order.
fn claim_regions(files: &[PathBuf]) -> (Vec<&PathBuf>, Vec<(&PathBuf, RegionPos)>) {
    let mut owners: HashMap<RegionPos, &PathBuf> = HashMap::new();
    for file in files {
        let Some(region) = region_of(file) else {
            continue;
        };
        let canonical = file.file_name().is_some_and(|n| n == region.file_name().as_str());
        match owners.entry(region) {
            Entry::Vacant(entry) => {
                entry.insert(file);
            }
            Entry::Occupied(mut entry) => {
                if canonical {
                    entry.insert(file);
                }
            }
        }
    }

    let mut claimed = Vec::new();
    let mut duplicates = Vec::new();
    for file in files {
        match region_of(file) {
            Some(region) if owners.get(&region) != Some(&file) => duplicates.push((file, region)),
            _ => claimed.push(file),
        }
    }
    (claimed, duplicates)
}

/// Migrates every region of a world from the 256-tall to the 384-tall layout.
pub struct WorldMigrator<P> {
    provider: P,
    options: MigrationOptions,
}

impl<P: StorageProvider> WorldMigrator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            options: MigrationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn run(&self, world: &World) -> Result<MigrationReport, MigrationError> {
        self.run_with_metrics(world, &MigrationMetrics::new())
    }

    /// Run the migration, recording into caller-owned metrics.
    ///
    /// Region and chunk failures are logged and counted; only failing to list
    /// the region directory or to start the worker pool is returned as an error.
    pub fn run_with_metrics(&self, world: &World, metrics: &MigrationMetrics) -> Result<MigrationReport, MigrationError> {
        let region_dir = world.region_dir();
        let files = discover_region_files(&region_dir)?;
        if files.is_empty() {
            log::debug!("No region files in {}", region_dir.display());
            return Ok(MigrationReport::empty(world));
        }

        log::info!("Starting conversion of world '{}'", world.name());

        let threads = self
            .options
            .threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("levelshift-worker-{}", i))
            .build()?;

        let worker = RegionWorker {
            provider: &self.provider,
            world,
            metrics,
            cancel: &self.options.cancel,
            total_files: files.len(),
        };

        let (claimed, duplicates) = claim_regions(&files);
        for (file, region) in &duplicates {
            log::warn!("Skipping {}: region {} is already migrated from another file", file.display(), region);
            metrics.record_skipped_file();
        }

        let mut outcomes: Vec<RegionOutcome> = pool.install(|| {
            claimed
                .par_iter()
                .map(|&file| {
                    // A panicking region must not take its siblings down with it
                    panic::catch_unwind(AssertUnwindSafe(|| worker.migrate(file))).unwrap_or_else(|payload| {
                        let err = MigrationError::Panicked {
                            file: file.clone(),
                            region: region_of(file),
                            message: panic_message(payload.as_ref()),
                        };
                        log::error!("{}", err);
                        metrics.record_region_failed();
                        RegionOutcome::Failed(err)
                    })
                })
                .collect()
        });
        outcomes.extend(duplicates.into_iter().map(|(file, _)| RegionOutcome::Skipped { file: file.clone() }));

        let failed_regions: Vec<RegionPos> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                RegionOutcome::Failed(e) if !e.is_cancelled() => e.region(),
                _ => None,
            })
            .collect();
        let cancelled = self.options.cancel.is_cancelled();

        let report = MigrationReport::from_metrics(world, files.len(), metrics, failed_regions, cancelled);
        if cancelled {
            log::warn!("Conversion of world {} cancelled after {:.2}s.", world.name(), report.elapsed_secs);
        } else {
            log::info!("World {} converted successfully in {:.2}s.", world.name(), report.elapsed_secs);
        }
        Ok(report)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BlockState, ChunkAccess, Layer};
    use crate::memory::{MemoryChunk, MemoryProvider};
    use crate::worker::tests::FaultyProvider;

    fn pillar(top: i32) -> MemoryChunk {
        let mut chunk = MemoryChunk::new();
        for y in 0..=top {
            chunk.set_block_state(0, y, 0, Layer::Primary, BlockState::new("minecraft:stone")).unwrap();
        }
        chunk
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_discovery_filters_entries() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "r.0.0.mca");
        touch(dir.path(), "r.1.0.mca");
        touch(dir.path(), "r.1.0.mca.bak");
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("r.5.5.mca")).unwrap();

        let files = discover_region_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["r.0.0.mca", "r.1.0.mca"]);
    }

    #[test]
    fn test_missing_region_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let world = World::new("empty", dir.path().join("nothing-here"));

        let report = WorldMigrator::new(MemoryProvider::new()).run(&world).unwrap();
        assert_eq!(report.total_files, 0);
        assert_eq!(report.regions_completed, 0);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_unparseable_file_counts_in_denominator() {
        let dir = tempfile::tempdir().unwrap();
        let region_dir = dir.path().join("region");
        std::fs::create_dir(&region_dir).unwrap();
        touch(&region_dir, "r.0.0.mca");
        touch(&region_dir, "backup.mca");

        let provider = MemoryProvider::new();
        let mut chunk = MemoryChunk::new();
        chunk.set_block_state(0, 0, 0, Layer::Primary, BlockState::new("minecraft:bedrock")).unwrap();
        provider.insert_chunk(RegionPos::new(0, 0), 0, 0, chunk);

        let world = World::new("mixed", dir.path());
        let options = MigrationOptions { threads: Some(2), ..Default::default() };
        let report = WorldMigrator::new(provider).with_options(options).run(&world).unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.regions_completed, 1);
        assert_eq!(report.chunks_migrated, 1);
        assert!(report.elapsed_secs >= 0.0);
    }

    #[test]
    fn test_cancelled_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let region_dir = dir.path().join("region");
        std::fs::create_dir(&region_dir).unwrap();
        touch(&region_dir, "r.0.0.mca");

        let provider = MemoryProvider::new();
        let mut chunk = MemoryChunk::new();
        chunk.set_block_state(0, 10, 0, Layer::Primary, BlockState::new("minecraft:stone")).unwrap();
        provider.insert_chunk(RegionPos::new(0, 0), 0, 0, chunk.clone());

        let options = MigrationOptions::default();
        options.cancel.cancel();
        let migrator = WorldMigrator::new(provider).with_options(options);
        let report = migrator.run(&World::new("w", dir.path())).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.regions_completed, 0);
        assert!(report.failed_regions.is_empty());
        assert_eq!(migrator.provider().chunk(RegionPos::new(0, 0), 0, 0), Some(chunk));
        assert_eq!(migrator.provider().chunk(RegionPos::new(0, 0), 0, 0).unwrap().highest_occupied_y(0, 0, false), 10);
    }

    #[test]
    fn test_copied_region_file_is_migrated_once() {
        let dir = tempfile::tempdir().unwrap();
        let region_dir = dir.path().join("region");
        std::fs::create_dir(&region_dir).unwrap();
        touch(&region_dir, "r.0.0.mca");
        touch(&region_dir, "r.0.0 - Copy.mca");

        let provider = MemoryProvider::new();
        let mut chunk = MemoryChunk::new();
        chunk.set_block_state(0, 10, 0, Layer::Primary, BlockState::new("minecraft:stone")).unwrap();
        provider.insert_chunk(RegionPos::new(0, 0), 0, 0, chunk);

        let options = MigrationOptions { threads: Some(1), ..Default::default() };
        let migrator = WorldMigrator::new(provider).with_options(options);
        let report = migrator.run(&World::new("copies", dir.path())).unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.regions_completed, 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.chunks_migrated, 1);
        let top = migrator.provider().chunk(RegionPos::new(0, 0), 0, 0).unwrap().highest_occupied_y(0, 0, false);
        assert_eq!(top, 74);
        assert_eq!(migrator.provider().closed_regions(), vec![RegionPos::new(0, 0)]);
    }

    #[test]
    fn test_canonical_name_wins_region_claim() {
        // " - Copy" sorts before ".mca", the canonical file still owns the region
        let files = vec![
            PathBuf::from("/w/region/r.0.0 - Copy.mca"),
            PathBuf::from("/w/region/r.0.0.mca"),
            PathBuf::from("/w/region/r.1.0 (old).mca"),
            PathBuf::from("/w/region/r.1.0 (older).mca"),
            PathBuf::from("/w/region/backup.mca"),
        ];
        let (claimed, duplicates) = claim_regions(&files);
        assert_eq!(claimed, vec![&files[1], &files[2], &files[4]]);
        assert_eq!(duplicates, vec![(&files[0], RegionPos::new(0, 0)), (&files[3], RegionPos::new(1, 0))]);
    }

    #[test]
    fn test_region_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let region_dir = dir.path().join("region");
        std::fs::create_dir(&region_dir).unwrap();
        let regions: Vec<RegionPos> = (0..4).map(|x| RegionPos::new(x, 0)).collect();

        let provider = FaultyProvider {
            fail_open: Some(regions[1]),
            fail_close: Some(regions[2]),
            panic_on_read: Some(regions[3]),
            ..Default::default()
        };
        for region in &regions {
            touch(&region_dir, &region.file_name());
            provider.inner.insert_chunk(*region, 0, 0, pillar(10));
        }

        let options = MigrationOptions { threads: Some(2), ..Default::default() };
        let metrics = MigrationMetrics::new();
        let migrator = WorldMigrator::new(provider).with_options(options);
        let report = migrator.run_with_metrics(&World::new("faulty", dir.path()), &metrics).unwrap();

        assert_eq!(report.total_files, 4);
        assert_eq!(report.regions_completed, 1);
        assert_eq!(report.regions_failed, 3);
        assert_eq!(report.failed_regions, vec![regions[1], regions[2], regions[3]]);
        assert!(!report.cancelled);
        assert_eq!(metrics.progress_percent(report.regions_completed, report.total_files), 25.0);

        let inner = &migrator.provider().inner;
        assert_eq!(inner.chunk(regions[0], 0, 0).unwrap().highest_occupied_y(0, 0, false), 74);
        assert_eq!(inner.chunk(regions[1], 0, 0).unwrap().highest_occupied_y(0, 0, false), 10);
        assert_eq!(inner.chunk(regions[3], 0, 0).unwrap().highest_occupied_y(0, 0, false), 10);
        assert_eq!(inner.closed_regions(), vec![regions[0]]);
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_region_name_is_discovered() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let name = OsStr::from_bytes(b"r.\xff.4.2.mca");
        std::fs::write(dir.path().join(name), b"").unwrap();
        touch(dir.path(), "r.0.0.mca");

        let files = discover_region_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        let odd = files.iter().find(|f| f.file_name() == Some(name)).unwrap();
        assert_eq!(region_of(odd), Some(RegionPos::new(4, 2)));
    }
}
