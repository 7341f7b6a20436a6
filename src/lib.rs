//! autolabel - batch annotation of gameplay frames for detector training.
//!
//! Scans a directory of captured frames, runs each through a detector
//! backend and writes one YOLO-style label file per frame
//! (`class cx cy w h`, normalized to the frame size).
//!
//! # Guarantees
//!
//! 1. **One outcome per frame**: every discovered frame ends up succeeded,
//!    failed or skipped, exactly once. A broken bijection is an internal
//!    error, never a silent gap.
//! 2. **Failure isolation**: decode, detector and write errors (and panics)
//!    fail only their own frame.
//! 3. **Bounded memory**: at most `concurrency + prefetch` decoded frames are
//!    resident at once, however large the input directory.
//! 4. **Atomic output**: label files appear whole or not at all.
//! 5. **Determinism**: frame indices, label contents and report order depend
//!    only on the input directory and the detector, not on scheduling.
//!
//! # Module Structure
//!
//! - `ingest`: frame source (directory listing)
//! - `frame`: frame descriptors and decoded pixel buffers
//! - `detect`: detector backend boundary and registry
//! - `label`: normalization, output layout, atomic label writer
//! - `pipeline`: admission gate, workers, scheduler
//! - `report`: per-frame outcomes, aggregator, run report

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod label;
pub mod pipeline;
pub mod progress;
pub mod report;

pub use config::PipelineConfig;
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use detect::{BackendRegistry, DetectorBackend, PixelBox, RawDetection, StubBackend};
pub use error::{
    AdapterError, FrameError, InvariantViolation, PipelineError, SourceError, WriteError,
};
pub use frame::{FrameDescriptor, PixelBuffer};
pub use ingest::{DirSourceConfig, FrameSource};
pub use label::{LabelWriter, NormalizedDetection, OutputLayout};
pub use pipeline::{CancelToken, Pipeline};
pub use progress::{NoProgress, ProgressSink};
pub use report::{FrameOutcome, PipelineReport, ReportEntry, ResultAggregator};
