use crate::error::AdapterError;
use crate::frame::PixelBuffer;

use super::result::RawDetection;

/// Detector backend trait.
///
/// This is the only thing the pipeline knows about inference. A backend may
/// wrap a local model, a remote service or a scripted fixture.
///
/// Implementations are shared across worker threads and called
/// concurrently, hence `&self` and `Send + Sync`. A backend that is not
/// reentrant must serialize internally.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded frame.
    ///
    /// Boxes are returned in pixel coordinates of `image`, in the order the
    /// label file should list them. An empty vector means nothing was found.
    fn detect(&self, image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
