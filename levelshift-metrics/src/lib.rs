use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every region worker of one migration run.
///
/// All updates are single atomic increments; nothing here needs a lock.
#[derive(Debug, Default)]
pub struct MigrationMetrics {
    // Region Stats
    pub regions_completed: AtomicUsize,
    pub regions_failed: AtomicUsize,
    pub files_skipped: AtomicUsize,

    // Chunk Stats
    pub chunks_migrated: AtomicUsize,
    pub chunks_absent: AtomicUsize,
    pub chunks_failed: AtomicUsize,
    pub blocks_moved: AtomicU64,
    pub block_entities_moved: AtomicU64,

    // Timing
    pub total_load_time_us: AtomicU64,
    pub total_shift_time_us: AtomicU64,
    pub max_shift_time_us: AtomicU64,
    pub total_save_time_us: AtomicU64,

    // Session
    pub start_time: Option<Instant>,
}

impl MigrationMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Count one finished region and return the running total.
    pub fn record_region_completed(&self) -> usize {
        self.regions_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_region_failed(&self) {
        self.regions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_file(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_absent(&self) {
        self.chunks_absent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_failed(&self) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, duration: Duration) {
        self.total_load_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_shift(&self, duration: Duration, blocks: u64, block_entities: u64) {
        let us = duration.as_micros() as u64;
        self.total_shift_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_shift_time_us.fetch_max(us, Ordering::Relaxed);
        self.blocks_moved.fetch_add(blocks, Ordering::Relaxed);
        self.block_entities_moved.fetch_add(block_entities, Ordering::Relaxed);
    }

    /// A chunk only counts as migrated once it is written back.
    pub fn record_save(&self, duration: Duration) {
        self.chunks_migrated.fetch_add(1, Ordering::Relaxed);
        self.total_save_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Percentage of `total` regions completed so far.
    pub fn progress_percent(&self, completed: usize, total: usize) -> f64 {
        if total == 0 {
            return 100.0;
        }
        (completed as f64 / total as f64) * 100.0
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.elapsed();
        let completed = self.regions_completed.load(Ordering::Relaxed);
        let failed = self.regions_failed.load(Ordering::Relaxed);
        let skipped = self.files_skipped.load(Ordering::Relaxed);

        let migrated = self.chunks_migrated.load(Ordering::Relaxed);
        let absent = self.chunks_absent.load(Ordering::Relaxed);
        let chunk_failures = self.chunks_failed.load(Ordering::Relaxed);
        let blocks = self.blocks_moved.load(Ordering::Relaxed);
        let entities = self.block_entities_moved.load(Ordering::Relaxed);

        let load_time = self.total_load_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let shift_time = self.total_shift_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let shift_max = self.max_shift_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let save_time = self.total_save_time_us.load(Ordering::Relaxed) as f64 / 1000.0;

        let per_chunk = |total: f64| if migrated > 0 { total / migrated as f64 } else { 0.0 };

        format!(
            "LevelShift Migration Report\n\
             ===========================\n\
             Session Duration: {:.2?}\n\n\
             [Regions]\n\
             Completed: {}\n\
             Failed: {}\n\
             Skipped Files: {}\n\n\
             [Chunks]\n\
             Migrated: {}\n\
             Absent: {}\n\
             Failed: {}\n\
             Blocks Moved: {}\n\
             Block Entities Moved: {}\n\n\
             [Timing]\n\
             Load Avg: {:.2} ms/chunk\n\
             Shift Avg: {:.2} ms/chunk\n\
             Shift Max: {:.2} ms\n\
             Save Avg: {:.2} ms/chunk\n",
            uptime,
            completed, failed, skipped,
            migrated, absent, chunk_failures, blocks, entities,
            per_chunk(load_time), per_chunk(shift_time), shift_max, per_chunk(save_time),
        )
    }
}
