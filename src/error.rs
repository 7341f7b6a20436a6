//! Error taxonomy.
//!
//! Fatal errors (`SourceError`, output root creation) abort a run before any
//! frame is dispatched. Per-frame errors (`FrameError`) never leave the frame
//! that produced them: they become `Failure` outcomes. `InvariantViolation`
//! is a scheduler bug and is reported on its own channel.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while enumerating input frames.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input directory {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("input path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    /// No supported image files were found. Not fatal for a run.
    #[error("no supported image files under {}", .0.display())]
    Empty(PathBuf),
    #[error("failed to scan {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Errors returned by a detector backend.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("timeout")]
    Timeout(Duration),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid detection: {0}")]
    InvalidOutput(String),
    #[error("detector panicked: {0}")]
    Panicked(String),
}

impl From<anyhow::Error> for AdapterError {
    fn from(err: anyhow::Error) -> Self {
        AdapterError::Inference(format!("{err:#}"))
    }
}

/// Errors raised while writing a label file.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("cannot create label directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write label {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot move label into place at {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single frame failed. Rendered verbatim into the report.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Write(#[from] WriteError),
    /// Earlier detector calls abandoned on timeout still hold every
    /// admission slot.
    #[error("timeout waiting for a free slot after {0:?}")]
    AdmissionTimeout(Duration),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Broken outcome bijection. Indicates a scheduler bug, never a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("frame {index} produced more than one outcome")]
    Duplicate { index: u64 },
    #[error("frame index {index} outside [0, {total})")]
    OutOfRange { index: u64, total: u64 },
    #[error("{} frame(s) produced no outcome, first missing index {}", .missing.len(), .missing.first().copied().unwrap_or_default())]
    Missing { missing: Vec<u64> },
}

/// Run-level error returned by [`crate::Pipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write class list: {0}")]
    ClassList(#[source] WriteError),
    #[error("internal invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
