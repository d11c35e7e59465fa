//! Moves every chunk of a world up by 64 blocks, from the 256-tall
//! layout (Y 0-255) to the 384-tall one (Y -64..319).
//!
//! Region files are migrated in parallel; each one is opened, walked chunk
//! by chunk, and closed by a single worker.

pub mod anvil;
pub mod chunk;
pub mod coordinator;
pub mod coords;
pub mod error;
pub mod memory;
pub mod shift;
pub mod storage;
pub mod worker;
pub mod world;

pub use anvil::AnvilProvider;
pub use chunk::{BlockEntity, BlockState, ChunkAccess, Layer};
pub use coordinator::{discover_region_files, CancelToken, MigrationOptions, MigrationReport, WorldMigrator};
pub use coords::{parse_region_coords, region_of, RegionPos};
pub use error::MigrationError;
pub use memory::MemoryProvider;
pub use storage::{RegionAccessor, StorageProvider};
pub use world::World;
