//! autolabel - annotate a directory of gameplay frames
//!
//! 1. Loads configuration (defaults, JSON file, AUTOLABEL_* env, flags)
//! 2. Selects a detector backend
//! 3. Runs the annotation pipeline, Ctrl-C stops admitting new frames
//! 4. Prints the run summary and optionally writes it as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use autolabel::config::normalize_extensions;
use autolabel::label::write_atomic;
use autolabel::{BackendRegistry, Pipeline, PipelineConfig, PipelineError, StubBackend};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Annotate gameplay frames with YOLO-format label files"
)]
struct Args {
    /// Directory of captured frames.
    input_dir: PathBuf,

    /// JSON configuration file.
    #[arg(long, env = "AUTOLABEL_CONFIG")]
    config: Option<PathBuf>,

    /// Write labels under this directory instead of next to each image.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Put every label directly in --output-dir instead of mirroring subdirectories.
    #[arg(long)]
    flat: bool,

    /// Frames processed at once (default: number of CPUs).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Minimum detection confidence to keep.
    #[arg(long)]
    confidence: Option<f32>,

    /// Per-frame detector timeout in milliseconds (0 disables).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Only scan the top level of the input directory.
    #[arg(long)]
    no_recursive: bool,

    /// Comma-separated image extensions to pick up.
    #[arg(long, value_delimiter = ',')]
    ext: Option<Vec<String>>,

    /// Detector backend.
    #[arg(long)]
    backend: Option<String>,

    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Model input edge in pixels for the tract backend.
    #[arg(long, default_value_t = 416)]
    model_size: u32,

    /// Skip frames whose label file already exists.
    #[arg(long)]
    no_overwrite: bool,

    /// Write the run report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let config = {
        let _stage = ui.stage("Load configuration");
        let mut config = PipelineConfig::load(args.config.as_deref())?;
        apply_args(&mut config, &args);
        config.validate()?;
        config
    };

    let registry = {
        let _stage = ui.stage("Load detector");
        build_registry(&args)?
    };
    let detector = registry.resolve(args.backend.as_deref())?;
    log::info!(
        "detector backend '{}' (available: {})",
        detector.name(),
        registry.list().join(", ")
    );

    let progress = Arc::new(ui.frame_progress());
    let pipeline = Pipeline::new(config, detector).with_progress(progress);

    let cancel = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        if !cancel.is_cancelled() {
            log::warn!("interrupt received, finishing in-flight frames");
        }
        cancel.cancel();
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let report = match pipeline.run(&args.input_dir) {
        Ok(report) => report,
        Err(err @ PipelineError::Invariant(_)) => {
            return Err(anyhow!("internal error, report discarded: {}", err));
        }
        Err(err) => return Err(err.into()),
    };

    println!("{}", report.summary());
    if let Some(path) = &args.report {
        let _stage = ui.stage("Write report");
        let json = serde_json::to_vec_pretty(&report)?;
        write_atomic(path, &json)?;
        println!("report written to {}", path.display());
    }
    Ok(())
}

fn apply_args(config: &mut PipelineConfig, args: &Args) {
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    if args.flat {
        config.flat_output = true;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(confidence) = args.confidence {
        config.confidence_threshold = confidence;
    }
    if let Some(ms) = args.timeout_ms {
        config.per_frame_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if args.no_recursive {
        config.recursive_scan = false;
    }
    if let Some(exts) = &args.ext {
        config.supported_extensions = normalize_extensions(exts.iter().map(String::as_str));
    }
    if args.no_overwrite {
        config.overwrite = false;
    }
}

fn build_registry(args: &Args) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    if let Some(model) = &args.model {
        register_model(&mut registry, model, args.model_size)?;
    }
    Ok(registry)
}

#[cfg(feature = "backend-tract")]
fn register_model(registry: &mut BackendRegistry, model: &Path, size: u32) -> Result<()> {
    let backend = autolabel::TractBackend::new(model, size, size)?;
    registry.register(backend);
    registry.set_default("tract")
}

#[cfg(not(feature = "backend-tract"))]
fn register_model(_registry: &mut BackendRegistry, model: &Path, _size: u32) -> Result<()> {
    Err(anyhow!(
        "cannot load {}: built without the backend-tract feature",
        model.display()
    ))
}
