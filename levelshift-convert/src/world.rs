use std::path::{Path, PathBuf};

/// Sub-directory of a world folder holding the region files.
pub const REGION_DIR: &str = "region";

/// Extension every region file carries, without the dot.
pub const REGION_EXTENSION: &str = "mca";

/// A persisted world: a display name and the folder its data lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct World {
    name: String,
    folder: PathBuf,
}

impl World {
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            folder: folder.into(),
        }
    }

    /// Resolve a world the way a server lays out its data: `<data_path>/worlds/<folder_name>`.
    pub fn from_data_path(data_path: impl AsRef<Path>, folder_name: &str) -> Self {
        Self::new(folder_name, data_path.as_ref().join("worlds").join(folder_name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn region_dir(&self) -> PathBuf {
        self.folder.join(REGION_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_layout() {
        let world = World::from_data_path("/srv/server", "survival");
        assert_eq!(world.name(), "survival");
        assert_eq!(world.folder(), Path::new("/srv/server/worlds/survival"));
        assert_eq!(world.region_dir(), PathBuf::from("/srv/server/worlds/survival/region"));
    }
}
