//! Region coordinates and how they are read from file names.

use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Number of chunks per region dimension.
pub const REGION_SIZE: i32 = 32;

/// Region file coordinates (parsed from filename like "r.0.-1.mca").
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Canonical file name for this region.
    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Convert local chunk coordinates to world chunk coordinates.
    pub fn local_to_world(&self, local_x: u8, local_z: u8) -> (i32, i32) {
        (
            self.x * REGION_SIZE + local_x as i32,
            self.z * REGION_SIZE + local_z as i32,
        )
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Extract region coordinates from a file name.
///
/// Takes the first two runs of an optional `-` followed by decimal digits,
/// in order of appearance. Returns `None` when there are fewer than two runs
/// or a run does not fit in an `i32`; such files are not region files.
pub fn parse_region_coords(file_name: &str) -> Option<RegionPos> {
    let mut runs = SignedRuns { text: file_name, pos: 0 };
    let x = runs.next()?.parse().ok()?;
    let z = runs.next()?.parse().ok()?;
    Some(RegionPos { x, z })
}

/// Region coordinates encoded in the file name of `path`.
///
/// Names that are not valid UTF-8 are read lossily; replacement characters
/// never form part of a coordinate.
pub fn region_of(path: &Path) -> Option<RegionPos> {
    parse_region_coords(&path.file_name()?.to_string_lossy())
}

/// Non-overlapping matches of `-?[0-9]+`, left to right.
struct SignedRuns<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for SignedRuns<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            let start = self.pos;
            let digits = if bytes[start] == b'-' { start + 1 } else { start };
            if digits < bytes.len() && bytes[digits].is_ascii_digit() {
                let end = digits + bytes[digits..].iter().take_while(|b| b.is_ascii_digit()).count();
                self.pos = end;
                // Only ASCII bytes bound the match, so both ends are char boundaries
                return Some(&self.text[start..end]);
            }
            self.pos += 1;
        }
        None
    }
}
