//! Progress reporting port for UI integration.

use crate::report::{FrameOutcome, PipelineReport};

/// Receives run progress. Called from the collecting thread only, one call
/// at a time, in completion order.
pub trait ProgressSink: Send + Sync {
    /// The run is about to dispatch `total` frames.
    fn on_start(&self, _total: u64) {}

    /// A frame produced its outcome.
    fn on_outcome(&self, _outcome: &FrameOutcome) {}

    /// The run finished and the report is final.
    fn on_finish(&self, _report: &PipelineReport) {}
}

/// Discards all progress events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}
