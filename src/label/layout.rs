//! Where label files go, and who gets a label path when two frames map to
//! the same one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::frame::FrameDescriptor;

pub const LABEL_EXTENSION: &str = "txt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputLayout {
    /// Next to the image: `shots/a.png -> shots/a.txt`.
    Alongside,
    /// Relative path mirrored under a root: `a/b.png -> root/a/b.txt`.
    Mirrored(PathBuf),
    /// Every label directly in a root, by file stem: `a/b.png -> root/b.txt`.
    Flat(PathBuf),
}

impl OutputLayout {
    pub fn from_options(output_dir: Option<&Path>, flat: bool) -> Self {
        match output_dir {
            None => OutputLayout::Alongside,
            Some(dir) if flat => OutputLayout::Flat(dir.to_path_buf()),
            Some(dir) => OutputLayout::Mirrored(dir.to_path_buf()),
        }
    }

    /// Root directory that must exist before a run, if any.
    pub fn root(&self) -> Option<&Path> {
        match self {
            OutputLayout::Alongside => None,
            OutputLayout::Mirrored(root) | OutputLayout::Flat(root) => Some(root),
        }
    }

    pub fn label_path(&self, frame: &FrameDescriptor) -> PathBuf {
        match self {
            OutputLayout::Alongside => frame.path.with_extension(LABEL_EXTENSION),
            OutputLayout::Mirrored(root) => root
                .join(&frame.relative_path)
                .with_extension(LABEL_EXTENSION),
            OutputLayout::Flat(root) => {
                // Append rather than `with_extension`: stems may contain dots.
                let mut name = frame
                    .path
                    .file_stem()
                    .map(|stem| stem.to_os_string())
                    .unwrap_or_else(|| format!("frame_{}", frame.index).into());
                name.push(".");
                name.push(LABEL_EXTENSION);
                root.join(name)
            }
        }
    }
}

/// Label paths handed out so far. Claims are made in submission order, so
/// the lowest-index frame always wins a contested path.
#[derive(Debug, Default)]
pub struct LabelClaims {
    owners: HashMap<PathBuf, u64>,
}

impl LabelClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for frame `index`. Returns the owning frame's index when
    /// the path is already taken.
    pub fn claim(&mut self, path: &Path, index: u64) -> Result<(), u64> {
        match self.owners.get(path) {
            Some(&owner) => Err(owner),
            None => {
                self.owners.insert(path.to_path_buf(), index);
                Ok(())
            }
        }
    }
}
