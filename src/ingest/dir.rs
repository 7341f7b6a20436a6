//! Directory frame source.
//!
//! `FrameSource` lists the image files under a root directory, orders them
//! lexicographically by relative path and hands out `FrameDescriptor`s on
//! demand. Indices are assigned in that order, so an unchanged directory
//! always yields the same index for the same file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::SourceError;
use crate::frame::FrameDescriptor;

/// Configuration for a directory source.
#[derive(Clone, Debug)]
pub struct DirSourceConfig {
    pub root: PathBuf,
    /// Lower-case extensions without the leading dot.
    pub extensions: BTreeSet<String>,
    pub recursive: bool,
}

/// Lazy, finite, ordered sequence of frame descriptors.
#[derive(Debug)]
pub struct FrameSource {
    root: PathBuf,
    entries: std::vec::IntoIter<(PathBuf, PathBuf)>,
    next_index: u64,
    total: u64,
}

impl FrameSource {
    /// Scan `config.root`. Returns `SourceError::Empty` when the directory
    /// holds no supported files; callers treat that as a zero-frame run.
    pub fn open(config: &DirSourceConfig) -> Result<Self, SourceError> {
        let root = &config.root;
        if !root.exists() {
            return Err(SourceError::NotFound(root.clone()));
        }
        if !root.is_dir() {
            return Err(SourceError::NotADirectory(root.clone()));
        }

        let max_depth = if config.recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(max_depth) {
            let entry = entry.map_err(|source| SourceError::Walk {
                path: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if !has_supported_extension(&path, &config.extensions) {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            entries.push((path, relative));
        }

        if entries.is_empty() {
            return Err(SourceError::Empty(root.clone()));
        }

        // Stable sort: equal keys keep walk order.
        entries.sort_by(|a, b| a.1.cmp(&b.1));

        let total = entries.len() as u64;
        log::info!(
            "FrameSource: {} frame(s) under {} (recursive={})",
            total,
            root.display(),
            config.recursive
        );

        Ok(Self {
            root: root.clone(),
            entries: entries.into_iter(),
            next_index: 0,
            total,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of frames the source will yield in total.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Iterator for FrameSource {
    type Item = FrameDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let (path, relative) = self.entries.next()?;
        let index = self.next_index;
        self.next_index += 1;
        Some(FrameDescriptor::new(index, path, relative))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for FrameSource {}

fn has_supported_extension(path: &Path, extensions: &BTreeSet<String>) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_ascii_lowercase()))
        .unwrap_or(false)
}
