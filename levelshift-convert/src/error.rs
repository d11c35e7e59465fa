use std::error::Error as StdError;
use std::path::PathBuf;

use crate::coords::RegionPos;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failures of a migration run.
///
/// Everything below `Discovery` and `WorkerPool` is scoped to a single region
/// or chunk and never aborts the rest of the run.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("failed to list region files in {}", path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to open region {region}")]
    RegionOpen {
        region: RegionPos,
        #[source]
        source: BoxError,
    },

    #[error("failed to read chunk ({chunk_x}, {chunk_z}) of region {region}")]
    ChunkRead {
        region: RegionPos,
        chunk_x: u8,
        chunk_z: u8,
        #[source]
        source: BoxError,
    },

    #[error("failed to shift chunk ({chunk_x}, {chunk_z}) of region {region}")]
    Transform {
        region: RegionPos,
        chunk_x: u8,
        chunk_z: u8,
        #[source]
        source: BoxError,
    },

    #[error("failed to write chunk ({chunk_x}, {chunk_z}) of region {region}")]
    ChunkWrite {
        region: RegionPos,
        chunk_x: u8,
        chunk_z: u8,
        #[source]
        source: BoxError,
    },

    #[error("failed to close region {region}")]
    RegionClose {
        region: RegionPos,
        #[source]
        source: BoxError,
    },

    #[error("migration of region {region} was cancelled")]
    Cancelled { region: RegionPos },

    #[error("worker for {} panicked: {message}", file.display())]
    Panicked {
        file: PathBuf,
        region: Option<RegionPos>,
        message: String,
    },
}

impl MigrationError {
    /// Region the failure belongs to, if any.
    pub fn region(&self) -> Option<RegionPos> {
        match self {
            Self::RegionOpen { region, .. }
            | Self::ChunkRead { region, .. }
            | Self::Transform { region, .. }
            | Self::ChunkWrite { region, .. }
            | Self::RegionClose { region, .. }
            | Self::Cancelled { region } => Some(*region),
            Self::Panicked { region, .. } => *region,
            Self::Discovery { .. } | Self::WorkerPool(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The message followed by every underlying cause, `a: b: c`.
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_includes_causes() {
        let cause = anyhow::anyhow!("disk full").context("writing sector 12");
        let err = MigrationError::ChunkWrite {
            region: RegionPos::new(1, -2),
            chunk_x: 4,
            chunk_z: 5,
            source: cause.into(),
        };

        let chain = err.chain();
        assert!(chain.starts_with("failed to write chunk (4, 5) of region (1, -2)"));
        assert!(chain.contains("writing sector 12"));
        assert!(chain.contains("disk full"));
        assert_eq!(err.region(), Some(RegionPos::new(1, -2)));
    }
}
