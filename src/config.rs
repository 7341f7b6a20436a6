use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::label::LABEL_EXTENSION;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PREFETCH: usize = 2;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    concurrency: Option<usize>,
    confidence_threshold: Option<f32>,
    supported_extensions: Option<Vec<String>>,
    recursive_scan: Option<bool>,
    /// Milliseconds; `0` disables the timeout.
    per_frame_timeout_ms: Option<u64>,
    output_dir: Option<PathBuf>,
    flat_output: Option<bool>,
    prefetch: Option<usize>,
    overwrite: Option<bool>,
    shutdown_grace_ms: Option<u64>,
    class_names: Option<Vec<String>>,
}

/// Options for an annotation run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Frames in flight at once.
    pub concurrency: usize,
    /// Detections below this confidence are not written.
    pub confidence_threshold: f32,
    /// Lower-case, without the dot.
    pub supported_extensions: BTreeSet<String>,
    pub recursive_scan: bool,
    pub per_frame_timeout: Option<Duration>,
    /// `None` writes labels next to their images.
    pub output_dir: Option<PathBuf>,
    pub flat_output: bool,
    /// Queued frames ahead of the workers, and extra admission headroom.
    pub prefetch: usize,
    pub overwrite: bool,
    pub shutdown_grace: Duration,
    pub class_names: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            recursive_scan: true,
            per_frame_timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            output_dir: None,
            flat_output: false,
            prefetch: DEFAULT_PREFETCH,
            overwrite: true,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            class_names: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the JSON file at `path` (or `$AUTOLABEL_CONFIG`), then
    /// `AUTOLABEL_*` environment overrides. Validated before returning.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("AUTOLABEL_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            concurrency: file.concurrency.unwrap_or(defaults.concurrency),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            supported_extensions: file
                .supported_extensions
                .map(|exts| normalize_extensions(exts.iter().map(String::as_str)))
                .unwrap_or(defaults.supported_extensions),
            recursive_scan: file.recursive_scan.unwrap_or(defaults.recursive_scan),
            per_frame_timeout: match file.per_frame_timeout_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.per_frame_timeout,
            },
            output_dir: file.output_dir.or(defaults.output_dir),
            flat_output: file.flat_output.unwrap_or(defaults.flat_output),
            prefetch: file.prefetch.unwrap_or(defaults.prefetch),
            overwrite: file.overwrite.unwrap_or(defaults.overwrite),
            shutdown_grace: file
                .shutdown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
            class_names: file.class_names.unwrap_or(defaults.class_names),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("AUTOLABEL_CONCURRENCY") {
            self.concurrency = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("AUTOLABEL_CONCURRENCY must be a positive integer"))?;
        }
        if let Ok(value) = std::env::var("AUTOLABEL_CONFIDENCE") {
            self.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("AUTOLABEL_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(dir) = std::env::var("AUTOLABEL_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(value) = std::env::var("AUTOLABEL_TIMEOUT_MS") {
            let ms: u64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("AUTOLABEL_TIMEOUT_MS must be an integer number of milliseconds"))?;
            self.per_frame_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Ok(value) = std::env::var("AUTOLABEL_EXTENSIONS") {
            let parsed = split_csv(&value);
            if !parsed.is_empty() {
                self.supported_extensions = normalize_extensions(parsed.iter().map(String::as_str));
            }
        }
        if let Ok(value) = std::env::var("AUTOLABEL_RECURSIVE") {
            self.recursive_scan = parse_bool(&value)
                .ok_or_else(|| anyhow!("AUTOLABEL_RECURSIVE must be true or false"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }
        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(anyhow!(
                "confidence threshold {} must be within [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.supported_extensions.is_empty() {
            return Err(anyhow!("at least one image extension is required"));
        }
        if self.supported_extensions.contains(LABEL_EXTENSION) {
            return Err(anyhow!(
                "'{}' is the label extension and cannot be an input extension",
                LABEL_EXTENSION
            ));
        }
        if self.per_frame_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("per-frame timeout must be greater than zero"));
        }
        if self.prefetch == 0 {
            return Err(anyhow!("prefetch must be at least 1"));
        }
        if self.flat_output && self.output_dir.is_none() {
            return Err(anyhow!("flat output requires an output directory"));
        }
        Ok(())
    }
}

/// Lower-case, strip leading dots, drop blanks.
pub fn normalize_extensions<'a>(exts: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    exts.into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
