//! Bounded worker pool.
//!
//! One producer thread walks the frame source in index order, resolves each
//! frame's label path and feeds a bounded job queue. `concurrency` workers
//! pull from that queue. Outcomes flow back over a channel to the calling
//! thread, which owns the aggregator, so no aggregation lock is needed.
//!
//! ```text
//! FrameSource -> producer -> [job queue: prefetch] -> worker x C -> outcomes -> aggregator
//!                    \----------- skipped (collision / exists / cancelled) ------/
//! ```

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::admission::AdmissionGate;
use super::cancel::CancelToken;
use super::worker::{AnnotationWorker, Job, WorkerContext, CANCELLED_REASON};
use crate::config::PipelineConfig;
use crate::detect::DetectorBackend;
use crate::error::{InvariantViolation, PipelineError, SourceError};
use crate::ingest::{DirSourceConfig, FrameSource};
use crate::label::{write_atomic, LabelClaims, LabelWriter, OutputLayout};
use crate::progress::{NoProgress, ProgressSink};
use crate::report::{FrameOutcome, PipelineReport, ResultAggregator};

pub const CLASS_LIST_FILE: &str = "classes.txt";

/// The annotation pipeline: frame source, worker pool and aggregator.
pub struct Pipeline {
    config: PipelineConfig,
    detector: Arc<dyn DetectorBackend>,
    cancel: CancelToken,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, detector: Arc<dyn DetectorBackend>) -> Self {
        Self {
            config,
            detector,
            cancel: CancelToken::new(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Annotate every supported image under `input_root`.
    ///
    /// Returns a report for every run that got past setup, including runs
    /// where every frame failed and runs cut short by cancellation. Errors
    /// are reserved for an invalid configuration, a missing input root, an
    /// output root that cannot be created, and broken internal invariants.
    pub fn run(&self, input_root: &Path) -> Result<PipelineReport, PipelineError> {
        let cfg = &self.config;
        cfg.validate()
            .map_err(|err| PipelineError::Config(format!("{err:#}")))?;
        let source = FrameSource::open(&DirSourceConfig {
            root: input_root.to_path_buf(),
            extensions: cfg.supported_extensions.clone(),
            recursive: cfg.recursive_scan,
        });
        let source = match source {
            Ok(source) => Some(source),
            Err(SourceError::Empty(root)) => {
                log::warn!("pipeline: no supported frames under {}", root.display());
                None
            }
            Err(err) => return Err(err.into()),
        };

        let layout = OutputLayout::from_options(cfg.output_dir.as_deref(), cfg.flat_output);
        self.prepare_output(&layout, input_root)?;

        let Some(source) = source else {
            let report = ResultAggregator::new(0).finish(self.cancel.is_cancelled())?;
            self.progress.on_start(0);
            self.progress.on_finish(&report);
            return Ok(report);
        };

        if let Err(err) = self.detector.warm_up() {
            log::warn!(
                "pipeline: detector '{}' warm-up failed: {}",
                self.detector.name(),
                err
            );
        }

        let total = source.total();
        let concurrency = cfg.concurrency.max(1);
        let ctx = WorkerContext {
            detector: Arc::clone(&self.detector),
            gate: AdmissionGate::new(concurrency + cfg.prefetch),
            cancel: self.cancel.clone(),
            writer: LabelWriter::new(),
            confidence_threshold: cfg.confidence_threshold,
            per_frame_timeout: cfg.per_frame_timeout,
        };
        log::info!(
            "pipeline: annotating {} frame(s) with '{}' (concurrency={}, admission={}, threshold={}, timeout={:?})",
            total,
            self.detector.name(),
            concurrency,
            ctx.gate.capacity(),
            cfg.confidence_threshold,
            cfg.per_frame_timeout
        );
        self.progress.on_start(total);

        let mut aggregator = ResultAggregator::new(total);
        let mut violation: Option<InvariantViolation> = None;
        let mut abandoned: Vec<JoinHandle<()>> = Vec::new();

        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(cfg.prefetch.max(1));
        let job_rx = Mutex::new(job_rx);
        let (outcome_tx, outcome_rx) = mpsc::channel::<FrameOutcome>();

        thread::scope(|scope| {
            let workers: Vec<_> = (0..concurrency)
                .map(|id| {
                    let ctx = &ctx;
                    let job_rx = &job_rx;
                    let outcome_tx = outcome_tx.clone();
                    scope.spawn(move || run_worker(id, ctx, job_rx, outcome_tx))
                })
                .collect();

            {
                let outcome_tx = outcome_tx.clone();
                let layout = &layout;
                let cancel = self.cancel.clone();
                let overwrite = cfg.overwrite;
                scope.spawn(move || {
                    dispatch(source, layout, overwrite, &cancel, job_tx, outcome_tx)
                });
            }
            drop(outcome_tx);

            for outcome in outcome_rx {
                self.progress.on_outcome(&outcome);
                if let Err(err) = aggregator.record(outcome) {
                    log::error!("pipeline: {}", err);
                    violation.get_or_insert(err);
                }
            }

            for worker in workers {
                match worker.join() {
                    Ok(handles) => abandoned.extend(handles),
                    Err(_) => log::error!("pipeline: worker thread panicked"),
                }
            }
        });

        reap_abandoned(abandoned, cfg.shutdown_grace);

        if let Some(err) = violation {
            return Err(err.into());
        }
        let report = aggregator.finish(self.cancel.is_cancelled()).map_err(|err| {
            log::error!("pipeline: {}", err);
            PipelineError::from(err)
        })?;

        log::info!(
            "pipeline: done total={} succeeded={} failed={} skipped={}{}",
            report.total,
            report.succeeded,
            report.failed,
            report.skipped,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        self.progress.on_finish(&report);
        Ok(report)
    }

    fn prepare_output(&self, layout: &OutputLayout, input_root: &Path) -> Result<(), PipelineError> {
        if let Some(root) = layout.root() {
            std::fs::create_dir_all(root).map_err(|source| PipelineError::OutputDir {
                path: root.to_path_buf(),
                source,
            })?;
        }
        if !self.config.class_names.is_empty() {
            let dir = layout.root().unwrap_or(input_root);
            let path = dir.join(CLASS_LIST_FILE);
            let mut content = self.config.class_names.join("\n");
            content.push('\n');
            write_atomic(&path, content.as_bytes()).map_err(PipelineError::ClassList)?;
        }
        Ok(())
    }
}

fn run_worker(
    id: usize,
    ctx: &WorkerContext,
    jobs: &Mutex<Receiver<Job>>,
    outcomes: Sender<FrameOutcome>,
) -> Vec<JoinHandle<()>> {
    let mut worker = AnnotationWorker::new(id, ctx);
    loop {
        // The lock is held only while waiting for the next job.
        let job = {
            let rx = jobs.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        let Ok(job) = job else {
            break;
        };
        if outcomes.send(worker.annotate(job)).is_err() {
            break;
        }
    }
    worker.into_abandoned()
}

/// Producer: claims label paths in index order and hands frames out.
/// Frames that will not be processed get their outcome here.
fn dispatch(
    source: FrameSource,
    layout: &OutputLayout,
    overwrite: bool,
    cancel: &CancelToken,
    jobs: SyncSender<Job>,
    outcomes: Sender<FrameOutcome>,
) {
    let mut claims = LabelClaims::new();
    let mut announced = false;
    for frame in source {
        if cancel.is_cancelled() {
            if !announced {
                log::warn!(
                    "pipeline: cancelled, skipping frames from index {}",
                    frame.index
                );
                announced = true;
            }
            let _ = outcomes.send(FrameOutcome::Skipped {
                index: frame.index,
                path: frame.path,
                reason: CANCELLED_REASON.to_string(),
            });
            continue;
        }

        let label_path = layout.label_path(&frame);
        if let Err(owner) = claims.claim(&label_path, frame.index) {
            log::warn!(
                "pipeline: {} collides with frame {} at {}",
                frame.path.display(),
                owner,
                label_path.display()
            );
            let _ = outcomes.send(FrameOutcome::Skipped {
                index: frame.index,
                path: frame.path,
                reason: format!("label path collides with frame {owner}"),
            });
            continue;
        }
        if !overwrite && label_path.exists() {
            let _ = outcomes.send(FrameOutcome::Skipped {
                index: frame.index,
                path: frame.path,
                reason: "label exists".to_string(),
            });
            continue;
        }

        if let Err(mpsc::SendError(job)) = jobs.send(Job { frame, label_path }) {
            let _ = outcomes.send(FrameOutcome::Skipped {
                index: job.frame.index,
                path: job.frame.path,
                reason: "worker pool unavailable".to_string(),
            });
        }
    }
}

/// Give detector threads abandoned on timeout up to `grace` to return.
fn reap_abandoned(handles: Vec<JoinHandle<()>>, grace: Duration) {
    if handles.is_empty() {
        return;
    }
    log::info!(
        "pipeline: waiting up to {:?} for {} timed-out detector call(s)",
        grace,
        handles.len()
    );
    let deadline = Instant::now() + grace;
    let mut pending = handles;
    loop {
        let (finished, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|handle| handle.is_finished());
        for handle in finished {
            let _ = handle.join();
        }
        pending = running;
        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if !pending.is_empty() {
        log::warn!(
            "pipeline: {} detector call(s) still running after grace period; detaching",
            pending.len()
        );
    }
}
