//! Label file writer.
//!
//! Output is one `class cx cy w h` line per detection, fixed precision,
//! newline-terminated. Zero detections produce an empty file, which means
//! "nothing found" rather than failure.
//!
//! Every write goes to a temporary file in the destination directory and is
//! renamed into place, so a reader never sees a partial label file.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::normalize::NormalizedDetection;
use crate::error::WriteError;

/// Digits after the decimal point in label files.
pub const LABEL_PRECISION: usize = 6;

#[derive(Clone, Copy, Debug)]
pub struct LabelWriter {
    precision: usize,
}

impl Default for LabelWriter {
    fn default() -> Self {
        Self {
            precision: LABEL_PRECISION,
        }
    }
}

impl LabelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render detections in label-file format.
    pub fn format(&self, detections: &[NormalizedDetection]) -> String {
        let p = self.precision;
        let mut out = String::with_capacity(detections.len() * (4 * (p + 3) + 4));
        for det in detections {
            // Writing into a String cannot fail.
            let _ = writeln!(
                out,
                "{} {:.p$} {:.p$} {:.p$} {:.p$}",
                det.class_id, det.cx, det.cy, det.w, det.h
            );
        }
        out
    }

    /// Write a label file atomically, creating parent directories as needed.
    pub fn write(&self, dest: &Path, detections: &[NormalizedDetection]) -> Result<(), WriteError> {
        self.stage(dest, detections)?.commit()
    }

    /// Write label content to a temporary file next to `dest` without making
    /// it visible. Nothing appears at `dest` until [`StagedLabel::commit`];
    /// dropping the staged label discards it.
    pub fn stage(
        &self,
        dest: &Path,
        detections: &[NormalizedDetection],
    ) -> Result<StagedLabel, WriteError> {
        stage_bytes(dest, self.format(detections).as_bytes())
    }
}

/// A fully written, not yet visible label file.
pub struct StagedLabel {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl StagedLabel {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename into place.
    pub fn commit(self) -> Result<(), WriteError> {
        let dest = self.dest;
        self.temp
            .persist(&dest)
            .map_err(|e| WriteError::Persist {
                path: dest.clone(),
                source: e.error,
            })?;
        Ok(())
    }
}

/// Atomically replace `dest` with `data`.
pub fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), WriteError> {
    stage_bytes(dest, data)?.commit()
}

fn stage_bytes(dest: &Path, data: &[u8]) -> Result<StagedLabel, WriteError> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|source| WriteError::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let io_err = |source: std::io::Error| WriteError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".autolabel-")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(io_err)?;
    temp.write_all(data).map_err(io_err)?;
    temp.flush().map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;

    Ok(StagedLabel {
        temp,
        dest: dest.to_path_buf(),
    })
}
