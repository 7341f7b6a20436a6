//! Per-frame annotation: decode, detect, normalize, write.
//!
//! Every error on that path, panics included, is turned into the frame's
//! `Failure` outcome here. Nothing escapes to the pool.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::admission::{AdmissionDenied, AdmissionGate, Permit};
use super::cancel::CancelToken;
use crate::detect::{DetectorBackend, RawDetection};
use crate::error::{panic_message, AdapterError, FrameError};
use crate::frame::{decode_rgb, FrameDescriptor, PixelBuffer};
use crate::label::{normalize_all, LabelWriter};
use crate::report::FrameOutcome;

pub const CANCELLED_REASON: &str = "cancelled";

/// A frame ready for a worker, with the label path it has been granted.
#[derive(Debug)]
pub struct Job {
    pub frame: FrameDescriptor,
    pub label_path: PathBuf,
}

/// Settings and shared handles every worker reads.
pub struct WorkerContext {
    pub detector: Arc<dyn DetectorBackend>,
    pub gate: Arc<AdmissionGate>,
    pub cancel: CancelToken,
    pub writer: LabelWriter,
    pub confidence_threshold: f32,
    pub per_frame_timeout: Option<Duration>,
}

/// One worker. Owns the detector threads it abandoned on timeout until the
/// pool collects them.
pub struct AnnotationWorker<'a> {
    id: usize,
    ctx: &'a WorkerContext,
    abandoned: Vec<JoinHandle<()>>,
}

impl<'a> AnnotationWorker<'a> {
    pub fn new(id: usize, ctx: &'a WorkerContext) -> Self {
        Self {
            id,
            ctx,
            abandoned: Vec::new(),
        }
    }

    /// Annotate one frame. Always returns exactly one outcome for it.
    pub fn annotate(&mut self, job: Job) -> FrameOutcome {
        let index = job.frame.index;
        let path = job.frame.path.clone();

        if self.ctx.cancel.is_cancelled() {
            return skipped(index, path);
        }
        // Bounded by the frame timeout: slots held by hung detector calls
        // must not stall the rest of the run.
        let permit = match self
            .ctx
            .gate
            .acquire(&self.ctx.cancel, self.ctx.per_frame_timeout)
        {
            Ok(permit) => permit,
            Err(AdmissionDenied::Cancelled) => return skipped(index, path),
            Err(AdmissionDenied::TimedOut) => {
                let reason =
                    FrameError::AdmissionTimeout(self.ctx.per_frame_timeout.unwrap_or_default());
                log::warn!(
                    "worker[{}]: frame {} ({}) failed: {}",
                    self.id,
                    index,
                    path.display(),
                    reason
                );
                return FrameOutcome::Failure {
                    index,
                    path,
                    reason,
                };
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(job, permit)))
            .unwrap_or_else(|payload| Err(FrameError::Panicked(panic_message(&*payload))));

        match result {
            Ok((label_path, detection_count)) => {
                log::debug!(
                    "worker[{}]: frame {} -> {} ({} detection(s))",
                    self.id,
                    index,
                    label_path.display(),
                    detection_count
                );
                FrameOutcome::Success {
                    index,
                    label_path,
                    detection_count,
                }
            }
            Err(reason) => {
                log::warn!(
                    "worker[{}]: frame {} ({}) failed: {}",
                    self.id,
                    index,
                    path.display(),
                    reason
                );
                FrameOutcome::Failure {
                    index,
                    path,
                    reason,
                }
            }
        }
    }

    /// Detector threads abandoned on timeout and still owed a join.
    pub fn into_abandoned(self) -> Vec<JoinHandle<()>> {
        self.abandoned
    }

    fn process(&mut self, job: Job, permit: Permit) -> Result<(PathBuf, usize), FrameError> {
        let Job { frame, label_path } = job;

        let rgb = decode_rgb(&frame.path)?;
        let (width, height) = (rgb.width(), rgb.height());
        let frame = frame.with_dimensions(width, height);
        let pixels = Arc::new(PixelBuffer::with_permit(rgb, permit));

        let raw = self.detect(frame.index, pixels)?;
        for det in &raw {
            det.validate()?;
        }

        let normalized = normalize_all(&raw, width, height, self.ctx.confidence_threshold);
        self.ctx.writer.write(&label_path, &normalized)?;
        Ok((label_path, normalized.len()))
    }

    /// Run the detector, bounded by the per-frame timeout when one is set.
    ///
    /// With a timeout the call runs on its own thread. If the deadline
    /// passes the thread is left to finish on its own; it still holds the
    /// pixel buffer, and with it the admission permit.
    fn detect(
        &mut self,
        index: u64,
        pixels: Arc<PixelBuffer>,
    ) -> Result<Vec<RawDetection>, AdapterError> {
        let Some(limit) = self.ctx.per_frame_timeout else {
            return guarded_detect(self.ctx.detector.as_ref(), &pixels);
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let detector = Arc::clone(&self.ctx.detector);
        let handle = thread::Builder::new()
            .name(format!("detect-{index}"))
            .spawn(move || {
                let _ = tx.send(guarded_detect(detector.as_ref(), &pixels));
            })
            .map_err(|e| AdapterError::Inference(format!("cannot start detector thread: {e}")))?;

        match rx.recv_timeout(limit) {
            Ok(result) => {
                let _ = handle.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "worker[{}]: detector exceeded {:?} on frame {}",
                    self.id,
                    limit,
                    index
                );
                self.abandoned.push(handle);
                Err(AdapterError::Timeout(limit))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(AdapterError::Panicked(
                    "detector thread exited without a result".to_string(),
                ))
            }
        }
    }
}

fn guarded_detect(
    detector: &dyn DetectorBackend,
    pixels: &PixelBuffer,
) -> Result<Vec<RawDetection>, AdapterError> {
    panic::catch_unwind(AssertUnwindSafe(|| detector.detect(pixels)))
        .unwrap_or_else(|payload| Err(AdapterError::Panicked(panic_message(&*payload))))
}

fn skipped(index: u64, path: PathBuf) -> FrameOutcome {
    FrameOutcome::Skipped {
        index,
        path,
        reason: CANCELLED_REASON.to_string(),
    }
}
