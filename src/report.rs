//! Per-frame outcomes and the run report.
//!
//! `ResultAggregator` receives outcomes in completion order and keys them by
//! frame index. At the end of a run every index in `[0, total)` must have
//! exactly one outcome; anything else is an `InvariantViolation`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{FrameError, InvariantViolation};

/// What happened to one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Success {
        index: u64,
        label_path: PathBuf,
        detection_count: usize,
    },
    Failure {
        index: u64,
        path: PathBuf,
        reason: FrameError,
    },
    Skipped {
        index: u64,
        path: PathBuf,
        reason: String,
    },
}

impl FrameOutcome {
    pub fn index(&self) -> u64 {
        match self {
            FrameOutcome::Success { index, .. }
            | FrameOutcome::Failure { index, .. }
            | FrameOutcome::Skipped { index, .. } => *index,
        }
    }
}

/// One line of the failure or skip list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub index: u64,
    pub path: PathBuf,
    pub reason: String,
}

/// Summary of a run. Lists are sorted by frame index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Label lines written across all succeeded frames.
    pub detections: u64,
    pub failures: Vec<ReportEntry>,
    pub skips: Vec<ReportEntry>,
    /// The run was interrupted; skipped frames include undispatched work.
    pub cancelled: bool,
}

impl PipelineReport {
    /// `(path, reason)` for every failed frame, in index order.
    pub fn failure_reasons(&self) -> Vec<(PathBuf, String)> {
        self.failures
            .iter()
            .map(|entry| (entry.path.clone(), entry.reason.clone()))
            .collect()
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "total={} succeeded={} failed={} skipped={} detections={}{}",
            self.total,
            self.succeeded,
            self.failed,
            self.skipped,
            self.detections,
            if self.cancelled { " (cancelled)" } else { "" }
        );
        for entry in &self.failures {
            out.push_str(&format!(
                "\n  failed  #{} {}: {}",
                entry.index,
                entry.path.display(),
                entry.reason
            ));
        }
        for entry in &self.skips {
            out.push_str(&format!(
                "\n  skipped #{} {}: {}",
                entry.index,
                entry.path.display(),
                entry.reason
            ));
        }
        out
    }
}

/// Collects outcomes keyed by frame index.
#[derive(Debug)]
pub struct ResultAggregator {
    total: u64,
    outcomes: BTreeMap<u64, FrameOutcome>,
}

impl ResultAggregator {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn received(&self) -> u64 {
        self.outcomes.len() as u64
    }

    /// Record one outcome. Rejects out-of-range and duplicate indices; the
    /// first outcome for an index is kept.
    pub fn record(&mut self, outcome: FrameOutcome) -> Result<(), InvariantViolation> {
        let index = outcome.index();
        if index >= self.total {
            return Err(InvariantViolation::OutOfRange {
                index,
                total: self.total,
            });
        }
        if self.outcomes.contains_key(&index) {
            return Err(InvariantViolation::Duplicate { index });
        }
        self.outcomes.insert(index, outcome);
        Ok(())
    }

    /// Check the bijection and build the report.
    pub fn finish(self, cancelled: bool) -> Result<PipelineReport, InvariantViolation> {
        if self.received() != self.total {
            let missing: Vec<u64> = (0..self.total)
                .filter(|index| !self.outcomes.contains_key(index))
                .collect();
            return Err(InvariantViolation::Missing { missing });
        }

        let mut report = PipelineReport {
            total: self.total,
            cancelled,
            ..PipelineReport::default()
        };
        // BTreeMap iteration is index order.
        for (_, outcome) in self.outcomes {
            match outcome {
                FrameOutcome::Success {
                    detection_count, ..
                } => {
                    report.succeeded += 1;
                    report.detections += detection_count as u64;
                }
                FrameOutcome::Failure {
                    index,
                    path,
                    reason,
                } => {
                    report.failed += 1;
                    report.failures.push(ReportEntry {
                        index,
                        path,
                        reason: reason.to_string(),
                    });
                }
                FrameOutcome::Skipped {
                    index,
                    path,
                    reason,
                } => {
                    report.skipped += 1;
                    report.skips.push(ReportEntry {
                        index,
                        path,
                        reason,
                    });
                }
            }
        }
        Ok(report)
    }
}
