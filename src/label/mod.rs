//! YOLO-style label files: normalization, on-disk layout and atomic writes.

pub mod layout;
pub mod normalize;
pub mod writer;

pub use layout::{LabelClaims, OutputLayout, LABEL_EXTENSION};
pub use normalize::{normalize, normalize_all, NormalizedDetection, EDGE_EPSILON};
pub use writer::{write_atomic, LabelWriter, StagedLabel, LABEL_PRECISION};
