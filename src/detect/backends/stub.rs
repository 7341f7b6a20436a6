use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::error::AdapterError;
use crate::frame::PixelBuffer;

/// Stub backend for dry runs. Finds nothing, so every frame gets an empty
/// label file.
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
        Ok(Vec::new())
    }
}
