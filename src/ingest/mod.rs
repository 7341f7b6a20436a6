//! Frame ingestion sources.
//!
//! A source only lists files. It never decodes: decoding happens inside a
//! worker, after admission, so that memory stays bounded by concurrency.

pub mod dir;

pub use dir::{DirSourceConfig, FrameSource};
