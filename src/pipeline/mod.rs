//! Concurrent annotation pipeline.
//!
//! - `admission`: bound on decoded frames resident at once
//! - `cancel`: cooperative stop signal
//! - `worker`: per-frame decode / detect / write
//! - `pool`: scheduler tying source, workers and aggregator together

pub mod admission;
pub mod cancel;
pub mod pool;
pub mod worker;

pub use admission::{AdmissionDenied, AdmissionGate, Permit};
pub use cancel::CancelToken;
pub use pool::{Pipeline, CLASS_LIST_FILE};
pub use worker::{AnnotationWorker, Job, WorkerContext, CANCELLED_REASON};
