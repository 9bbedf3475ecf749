use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use veil_core::{
    JobLedger, JobState, MemoryPhotoStore, Pipeline, PipelineError, PhotoStore, RedactionRequest,
};
use veil_detect::{DetectError, Detector, DetectorHandle};
use veil_render::PixelBox;
use veil_rules::{Detection, DetectionClass, RedactionPolicy};

/// 返回固定检测结果
struct StubDetector {
    detections: Vec<Detection>,
}

impl Detector for StubDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        Ok(self.detections.clone())
    }
}

/// 推理阶段出错
struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        Err(DetectError::Inference("output tensor missing".to_string()))
    }
}

fn face(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
    Detection {
        class: DetectionClass::Face,
        confidence: 0.91234,
        bbox: PixelBox::new(x1, y1, x2, y2),
    }
}

fn plate(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
    Detection {
        class: DetectionClass::LicensePlate,
        confidence: 0.8,
        bbox: PixelBox::new(x1, y1, x2, y2),
    }
}

fn pipeline_with(detections: Vec<Detection>) -> Pipeline {
    let detector: Arc<dyn Detector> = Arc::new(StubDetector { detections });
    Pipeline::new(Arc::new(DetectorHandle::ready(detector)), JobLedger::in_memory())
}

/// 高对比度棋盘格，模糊后必然变化
fn write_checkerboard(path: &Path, w: u32, h: u32) -> RgbImage {
    let image = RgbImage::from_fn(w, h, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    image.save(path).unwrap();
    image
}

#[test]
fn test_face_is_blurred_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("street.png");
    let original = write_checkerboard(&input, 400, 300);

    let pipeline = pipeline_with(vec![face(100, 100, 200, 200)]);
    let record = pipeline.process(&RedactionRequest::new(&input)).unwrap();

    assert_eq!(record.state, JobState::Success);
    assert_eq!(record.progress, 100);
    let result = record.result.unwrap();
    assert_eq!(result.faces_detected, 1);
    assert_eq!(result.plates_detected, 0);
    assert_eq!(result.total_detections, 1);
    assert!((result.detections[0].confidence - 0.912).abs() < 1e-6);
    assert_eq!((result.image_size.width, result.image_size.height), (400, 300));

    let output_path = dir.path().join("processed").join("blurred_street.png");
    assert_eq!(Path::new(&result.output_path), output_path);
    let output = image::open(&output_path).unwrap().to_rgb8();
    assert_eq!(output.dimensions(), (400, 300));

    let changed_inside = (100..200)
        .flat_map(|y| (100..200).map(move |x| (x, y)))
        .filter(|&(x, y)| output.get_pixel(x, y) != original.get_pixel(x, y))
        .count();
    assert!(changed_inside > 100 * 100 / 2);

    for (x, y, pixel) in output.enumerate_pixels() {
        let inside_zone = (50..250).contains(&x) && (50..250).contains(&y);
        if !inside_zone {
            assert_eq!(pixel, original.get_pixel(x, y), "pixel ({}, {}) changed", x, y);
        }
    }
}

#[test]
fn test_missing_input_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.jpg");

    let pipeline = pipeline_with(vec![face(0, 0, 10, 10)]);
    let record = pipeline.process(&RedactionRequest::new(&input)).unwrap();

    assert_eq!(record.state, JobState::Failure);
    assert_eq!(
        record.error.as_deref(),
        Some(PipelineError::InputNotFound(input.clone()).to_string().as_str())
    );
    assert!(record.result.is_none());
    assert!(!dir.path().join("processed").exists());
}

#[test]
fn test_disabled_class_is_annotated_but_not_blurred() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("car.png");
    let original = write_checkerboard(&input, 200, 100);
    let output_path = dir.path().join("out").join("car_redacted.png");

    let pipeline = pipeline_with(vec![plate(50, 40, 150, 60)]);
    let request = RedactionRequest::new(&input)
        .with_output(&output_path)
        .with_policy(RedactionPolicy {
            blur_faces: true,
            blur_plates: false,
        });
    let record = pipeline.process(&request).unwrap();

    assert_eq!(record.state, JobState::Success);
    let result = record.result.unwrap();
    assert_eq!(result.plates_detected, 0);
    assert_eq!(result.total_detections, 1);
    assert_eq!(result.detections[0].class, DetectionClass::LicensePlate);

    let output = image::open(&output_path).unwrap().to_rgb8();
    assert_eq!(output, original);
}

#[test]
fn test_photo_marked_processed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("upload.png");
    write_checkerboard(&input, 64, 64);

    let photos = Arc::new(MemoryPhotoStore::new());
    let photo = photos.create_record(1, &input.display().to_string()).unwrap();
    let pipeline = pipeline_with(vec![face(10, 10, 30, 30)]).with_photo_store(photos.clone());

    let record = pipeline
        .process(&RedactionRequest::new(&input).with_photo_id(photo.id))
        .unwrap();
    assert_eq!(record.state, JobState::Success);
    assert_eq!(record.result.unwrap().photo_id, Some(photo.id));
    assert!(photos.get_record(photo.id).unwrap().unwrap().is_processed);
}

#[test]
fn test_unknown_photo_does_not_fail_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("upload.png");
    write_checkerboard(&input, 32, 32);

    let pipeline = pipeline_with(Vec::new()).with_photo_store(Arc::new(MemoryPhotoStore::new()));
    let record = pipeline
        .process(&RedactionRequest::new(&input).with_photo_id(99))
        .unwrap();
    assert_eq!(record.state, JobState::Success);
}

#[test]
fn test_detector_load_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("a.png");
    write_checkerboard(&input, 16, 16);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let handle = DetectorHandle::lazy(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(DetectError::ModelLoad("model.onnx not found".to_string()))
    });
    let pipeline = Pipeline::new(Arc::new(handle), JobLedger::in_memory());

    let record = pipeline.process(&RedactionRequest::new(&input)).unwrap();
    assert_eq!(record.state, JobState::Failure);
    assert!(record.error.unwrap().contains("model.onnx not found"));
    assert!(record.progress >= 20);

    pipeline.process(&RedactionRequest::new(&input)).unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_run_skips_terminal_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("a.png");
    write_checkerboard(&input, 16, 16);

    let pipeline = pipeline_with(Vec::new());
    let request = RedactionRequest::new(&input);
    let id = pipeline.ledger().submit(&request).unwrap();
    let first = pipeline.run(&id, &request).unwrap();
    let second = pipeline.run(&id, &request).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_undecodable_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.png");
    std::fs::write(&input, b"not an image").unwrap();

    let pipeline = pipeline_with(Vec::new());
    let record = pipeline.process(&RedactionRequest::new(&input)).unwrap();
    assert_eq!(record.state, JobState::Failure);
    assert!(!dir.path().join("processed").join("blurred_broken.png").exists());
}

#[test]
fn test_inference_error_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("a.png");
    write_checkerboard(&input, 32, 32);

    let detector: Arc<dyn Detector> = Arc::new(FailingDetector);
    let pipeline = Pipeline::new(Arc::new(DetectorHandle::ready(detector)), JobLedger::in_memory());
    let record = pipeline.process(&RedactionRequest::new(&input)).unwrap();

    assert_eq!(record.state, JobState::Failure);
    let expected = PipelineError::Detector(DetectError::Inference("output tensor missing".to_string())).to_string();
    assert_eq!(record.error.as_deref(), Some(expected.as_str()));
    assert_eq!(record.progress, 50);
    assert!(record.result.is_none());
    assert!(!dir.path().join("processed").join("blurred_a.png").exists());
}
