use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

/// Registry of detector backends, selectable by name.
///
/// Backends are stored behind `Arc` only: `DetectorBackend::detect` takes
/// `&self`, so the pipeline shares one instance across all workers.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DetectorBackend>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<dyn DetectorBackend>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve `name`, or the default backend when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn DetectorBackend>> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "backend '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no detector backend registered")),
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::RawDetection;
    use crate::error::AdapterError;
    use crate::frame::PixelBuffer;
    use crate::StubBackend;

    struct Named(&'static str);

    impl DetectorBackend for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn detect(&self, _image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(Named("onnx"));
        assert_eq!(registry.default_backend().unwrap().name(), "stub");
        assert_eq!(registry.list(), vec!["onnx", "stub"]);
    }

    #[test]
    fn set_default_requires_registration() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        assert!(registry.set_default("missing").is_err());
        registry.register(Named("onnx"));
        registry.set_default("onnx").unwrap();
        assert_eq!(registry.resolve(None).unwrap().name(), "onnx");
    }

    #[test]
    fn resolve_unknown_names_available() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        let err = registry.resolve(Some("yolo")).err().unwrap();
        assert!(err.to_string().contains("available: stub"));
        assert!(BackendRegistry::new().resolve(None).is_err());
    }
}
