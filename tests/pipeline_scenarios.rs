use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage};

use autolabel::{
    AdapterError, CancelToken, DetectorBackend, Pipeline, PipelineConfig, PipelineError,
    PixelBox, PixelBuffer, RawDetection, SourceError,
};

/// Frames carry their identity in the red channel of pixel (0, 0).
fn write_frame(dir: &Path, name: &str, tag: u8, size: (u32, u32)) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(size.0, size.1, Rgb([tag, 0, 0]))
        .save(&path)
        .unwrap();
    path
}

fn tag_of(image: &PixelBuffer) -> u8 {
    image.image().get_pixel(0, 0)[0]
}

fn config(concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        concurrency,
        per_frame_timeout: None,
        ..PipelineConfig::default()
    }
}

/// Tag 0: two boxes. Tag 1: nothing. Tag 2: hangs past any sane timeout.
/// Tags >= 100 fail when divisible by 7, otherwise one box.
struct ScriptedDetector;

impl DetectorBackend for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
        let (w, h) = (image.width() as f32, image.height() as f32);
        match tag_of(image) {
            0 => Ok(vec![
                RawDetection::new(0, 0.9, PixelBox::new(0.0, 0.0, w / 2.0, h / 2.0)),
                RawDetection::new(3, 0.8, PixelBox::new(w / 2.0, h / 2.0, w, h)),
            ]),
            1 => Ok(Vec::new()),
            2 => {
                thread::sleep(Duration::from_millis(500));
                Ok(Vec::new())
            }
            tag if tag % 7 == 0 => Err(AdapterError::Inference(format!("frame tag {tag}"))),
            _ => Ok(vec![RawDetection::new(
                1,
                0.7,
                PixelBox::new(0.0, 0.0, w / 4.0, h / 4.0),
            )]),
        }
    }
}

#[test]
fn mixed_frames_produce_one_outcome_each() {
    let input = tempfile::tempdir().unwrap();
    write_frame(input.path(), "frame0.png", 0, (100, 50));
    write_frame(input.path(), "frame1.png", 1, (100, 50));
    write_frame(input.path(), "frame2.png", 2, (100, 50));

    let cfg = PipelineConfig {
        per_frame_timeout: Some(Duration::from_millis(100)),
        shutdown_grace: Duration::from_secs(2),
        ..config(2)
    };
    let report = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.detections, 2);
    assert!(!report.cancelled);
    assert_eq!(
        report.failure_reasons(),
        vec![(input.path().join("frame2.png"), "timeout".to_string())]
    );

    let frame0 = std::fs::read_to_string(input.path().join("frame0.txt")).unwrap();
    assert_eq!(
        frame0,
        "0 0.250000 0.250000 0.500000 0.500000\n3 0.750000 0.750000 0.500000 0.500000\n"
    );
    let frame1 = std::fs::read_to_string(input.path().join("frame1.txt")).unwrap();
    assert!(frame1.is_empty());
    assert!(!input.path().join("frame2.txt").exists());
}

#[test]
fn empty_directory_yields_empty_report() {
    let input = tempfile::tempdir().unwrap();
    std::fs::write(input.path().join("notes.md"), "not a frame").unwrap();

    let report = Pipeline::new(config(2), Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.total, 0);
    assert_eq!(report.succeeded + report.failed + report.skipped, 0);
    assert!(report.failures.is_empty());
}

#[test]
fn missing_input_directory_is_fatal_and_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("labels");
    let cfg = PipelineConfig {
        output_dir: Some(out.clone()),
        ..config(2)
    };

    let err = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(&root.path().join("does-not-exist"))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Source(SourceError::NotFound(_))));
    assert!(!out.exists());
}

#[test]
fn rerun_produces_identical_labels() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..12u8 {
        write_frame(input.path(), &format!("shot_{i:02}.png"), 100 + i, (64, 48));
    }
    write_frame(input.path(), "shot_boxes.png", 0, (64, 48));

    let read_labels = || -> Vec<(PathBuf, Vec<u8>)> {
        let mut labels: Vec<_> = std::fs::read_dir(input.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .map(|path| {
                let bytes = std::fs::read(&path).unwrap();
                (path, bytes)
            })
            .collect();
        labels.sort();
        labels
    };

    let first = Pipeline::new(config(4), Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();
    let first_labels = read_labels();
    let second = Pipeline::new(config(1), Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first_labels, read_labels());
    assert!(!first_labels.is_empty());
}

#[test]
fn every_frame_is_accounted_for_in_index_order() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..60u8 {
        write_frame(input.path(), &format!("f{i:03}.png"), 100 + i, (16, 16));
    }

    let report = Pipeline::new(config(4), Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    let expected_failures: Vec<u64> = (0..60u64).filter(|i| (100 + i) % 7 == 0).collect();
    let failed_indices: Vec<u64> = report.failures.iter().map(|entry| entry.index).collect();
    assert_eq!(report.total, 60);
    assert_eq!(report.succeeded + report.failed + report.skipped, 60);
    assert_eq!(failed_indices, expected_failures);
    for entry in &report.failures {
        assert!(entry.reason.contains("inference failed"), "{}", entry.reason);
        assert!(!entry.path.with_extension("txt").exists());
    }
}

#[test]
fn single_worker_processes_everything() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..5u8 {
        write_frame(input.path(), &format!("f{i}.png"), 1, (8, 8));
    }

    let report = Pipeline::new(config(1), Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 5);
    for i in 0..5 {
        assert!(input.path().join(format!("f{i}.txt")).exists());
    }
}

#[derive(Default)]
struct CallStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

/// Tracks how many detector calls overlap.
struct CountingDetector(Arc<CallStats>);

impl DetectorBackend for CountingDetector {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn detect(&self, _image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
        let stats = &self.0;
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        stats.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        stats.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[test]
fn in_flight_work_stays_within_concurrency() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..40u8 {
        write_frame(input.path(), &format!("f{i:02}.png"), i, (8, 8));
    }

    let stats = Arc::new(CallStats::default());
    let cfg = PipelineConfig {
        prefetch: 1,
        per_frame_timeout: Some(Duration::from_secs(10)),
        ..config(3)
    };
    let report = Pipeline::new(cfg, Arc::new(CountingDetector(Arc::clone(&stats))))
        .run(input.path())
        .unwrap();

    assert_eq!(report.succeeded, 40);
    assert_eq!(stats.calls.load(Ordering::SeqCst), 40);
    let peak = stats.peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak concurrency {peak}");
}

/// Cancels the run from inside the first detector call.
struct CancelOnFirst(CancelToken);

impl DetectorBackend for CancelOnFirst {
    fn name(&self) -> &'static str {
        "cancel-on-first"
    }

    fn detect(&self, _image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
        self.0.cancel();
        thread::sleep(Duration::from_millis(20));
        Ok(Vec::new())
    }
}

#[test]
fn cancellation_finishes_in_flight_frame_and_skips_the_rest() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..10u8 {
        write_frame(input.path(), &format!("f{i}.png"), i, (8, 8));
    }

    let cancel = CancelToken::new();
    let cfg = PipelineConfig {
        prefetch: 1,
        ..config(1)
    };
    let report = Pipeline::new(cfg, Arc::new(CancelOnFirst(cancel.clone())))
        .with_cancel_token(cancel)
        .run(input.path())
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.total, 10);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 9);
    assert!(input.path().join("f0.txt").exists());
    assert!(report.skips.iter().all(|entry| entry.reason == "cancelled"));
    assert!(!input.path().join("f9.txt").exists());
}

#[test]
fn undecodable_frame_fails_alone() {
    let input = tempfile::tempdir().unwrap();
    write_frame(input.path(), "a.png", 1, (8, 8));
    std::fs::write(input.path().join("b.png"), b"definitely not a png").unwrap();
    write_frame(input.path(), "c.png", 1, (8, 8));

    let report = Pipeline::new(config(2), Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(report.failures[0].reason.starts_with("decode failed"));
    assert!(!input.path().join("b.txt").exists());
}

#[test]
fn mirrored_output_keeps_subdirectories() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_frame(input.path(), "level1/boss.png", 0, (20, 20));
    write_frame(input.path(), "menu.jpg", 0, (20, 20));

    let cfg = PipelineConfig {
        output_dir: Some(out.path().to_path_buf()),
        class_names: vec!["player".to_string(), "enemy".to_string()],
        ..config(2)
    };
    let report = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert!(out.path().join("level1").join("boss.txt").exists());
    assert!(out.path().join("menu.txt").exists());
    assert!(!input.path().join("level1").join("boss.txt").exists());
    assert_eq!(
        std::fs::read_to_string(out.path().join("classes.txt")).unwrap(),
        "player\nenemy\n"
    );
}

#[test]
fn flat_output_collision_skips_later_frame() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_frame(input.path(), "a/shot.png", 0, (10, 10));
    write_frame(input.path(), "b/shot.png", 1, (10, 10));

    let cfg = PipelineConfig {
        output_dir: Some(out.path().to_path_buf()),
        flat_output: true,
        ..config(2)
    };
    let report = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.skips[0].index, 1);
    assert_eq!(report.skips[0].reason, "label path collides with frame 0");
    // Frame 0 has two boxes, so its label is the one on disk.
    let label = std::fs::read_to_string(out.path().join("shot.txt")).unwrap();
    assert_eq!(label.lines().count(), 2);
}

#[test]
fn existing_labels_are_kept_without_overwrite() {
    let input = tempfile::tempdir().unwrap();
    write_frame(input.path(), "keep.png", 0, (10, 10));
    write_frame(input.path(), "fresh.png", 0, (10, 10));
    std::fs::write(input.path().join("keep.txt"), "5 0.5 0.5 0.1 0.1\n").unwrap();

    let cfg = PipelineConfig {
        overwrite: false,
        ..config(2)
    };
    let report = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.skips[0].reason, "label exists");
    assert_eq!(
        std::fs::read_to_string(input.path().join("keep.txt")).unwrap(),
        "5 0.5 0.5 0.1 0.1\n"
    );
    assert!(input.path().join("fresh.txt").exists());
}

#[test]
fn non_recursive_scan_ignores_subdirectories() {
    let input = tempfile::tempdir().unwrap();
    write_frame(input.path(), "top.png", 1, (8, 8));
    write_frame(input.path(), "nested/deep.png", 1, (8, 8));

    let cfg = PipelineConfig {
        recursive_scan: false,
        ..config(2)
    };
    let report = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.total, 1);
    assert!(!input.path().join("nested").join("deep.txt").exists());
}

/// Never returns within the lifetime of a test.
struct HungDetector;

impl DetectorBackend for HungDetector {
    fn name(&self) -> &'static str {
        "hung"
    }

    fn detect(&self, _image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
        thread::sleep(Duration::from_secs(3600));
        Ok(Vec::new())
    }
}

#[test]
fn hung_detector_fails_every_frame_and_run_completes() {
    let input = tempfile::tempdir().unwrap();
    for i in 0..6u8 {
        write_frame(input.path(), &format!("f{i}.png"), i, (8, 8));
    }

    let cfg = PipelineConfig {
        prefetch: 1,
        per_frame_timeout: Some(Duration::from_millis(20)),
        shutdown_grace: Duration::from_millis(100),
        ..config(1)
    };
    let (tx, rx) = std::sync::mpsc::channel();
    let root = input.path().to_path_buf();
    thread::spawn(move || {
        let _ = tx.send(Pipeline::new(cfg, Arc::new(HungDetector)).run(&root));
    });
    let report = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("run did not finish")
        .unwrap();

    assert_eq!(report.total, 6);
    assert_eq!(report.failed, 6);
    assert_eq!(report.succeeded + report.skipped, 0);
    for entry in &report.failures {
        assert!(entry.reason.starts_with("timeout"), "{}", entry.reason);
        assert!(!entry.path.with_extension("txt").exists());
    }
}

#[test]
fn label_write_failure_fails_only_that_frame() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_frame(input.path(), "level1/boss.png", 0, (20, 20));
    write_frame(input.path(), "menu.png", 1, (20, 20));
    write_frame(input.path(), "title.png", 0, (20, 20));
    // A plain file where the mirrored label directory should go.
    std::fs::write(out.path().join("level1"), "in the way").unwrap();

    let cfg = PipelineConfig {
        output_dir: Some(out.path().to_path_buf()),
        ..config(2)
    };
    let report = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].index, 0);
    assert!(
        report.failures[0]
            .reason
            .starts_with("cannot create label directory"),
        "{}",
        report.failures[0].reason
    );
    assert!(out.path().join("menu.txt").exists());
    assert!(out.path().join("title.txt").exists());
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let input = tempfile::tempdir().unwrap();
    write_frame(input.path(), "f0.png", 0, (8, 8));

    let cfg = PipelineConfig {
        confidence_threshold: f32::NAN,
        ..config(1)
    };
    let err = Pipeline::new(cfg, Arc::new(ScriptedDetector))
        .run(input.path())
        .unwrap_err();

    assert!(matches!(err, PipelineError::Config(_)));
    assert!(!input.path().join("f0.txt").exists());
}
