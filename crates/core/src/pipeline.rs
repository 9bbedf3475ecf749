//! 脱敏流水线
//!
//! 文件检查 → 加载模型 → 读取图片 → 检测 → 归并 → 逐框模糊 → 保存 → 标记照片。
//! 每个阶段返回 `Result<_, PipelineError>`，由 [`Pipeline::run`] 统一转换为一次 `fail`。

use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use veil_detect::{DetectError, Detector, DetectorHandle};
use veil_render::{apply_redactions, BlurParams};
use veil_rules::{reduce, Reduction};

use crate::job::{ImageSize, JobError, JobId, JobLedger, JobRecord, JobResult, StageCounts};
use crate::photo::PhotoStore;
use crate::RedactionRequest;

/// 默认输出目录名
pub const PROCESSED_DIR: &str = "processed";
/// 默认输出文件名前缀
pub const OUTPUT_PREFIX: &str = "blurred_";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("图片不存在: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("无法读取图片: {0}")]
    Decode(String),

    #[error("检测失败: {0}")]
    Detector(#[from] DetectError),

    #[error("保存结果失败: {0}")]
    Encode(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// 单任务流水线
///
/// 检测器句柄在所有任务间共享，图片只属于当前任务
#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<DetectorHandle>,
    ledger: JobLedger,
    photos: Option<Arc<dyn PhotoStore>>,
    blur: BlurParams,
}

impl Pipeline {
    pub fn new(detector: Arc<DetectorHandle>, ledger: JobLedger) -> Self {
        Self {
            detector,
            ledger,
            photos: None,
            blur: BlurParams::default(),
        }
    }

    /// 处理完成后标记照片记录
    pub fn with_photo_store(mut self, photos: Arc<dyn PhotoStore>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn with_blur_params(mut self, blur: BlurParams) -> Self {
        self.blur = blur;
        self
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// 提交并立即在当前线程执行
    pub fn process(&self, request: &RedactionRequest) -> Result<JobRecord, JobError> {
        let id = self.ledger.submit(request)?;
        self.run(&id, request)
    }

    /// 执行已提交的任务，返回终态记录
    ///
    /// 已结束的任务直接返回当前记录
    pub fn run(&self, id: &JobId, request: &RedactionRequest) -> Result<JobRecord, JobError> {
        let current = self.ledger.query(id)?;
        if current.state.is_terminal() {
            log::warn!("[Pipeline] [{}] 任务已结束 ({})，跳过", id, current.state);
            return Ok(current);
        }

        log::info!("[Pipeline] [{}] 开始处理: {}", id, request.image_path.display());
        match self.execute(id, request) {
            Ok(result) => {
                log::info!(
                    "[Pipeline] [{}] 处理完成，人脸: {}，车牌: {}",
                    id,
                    result.faces_detected,
                    result.plates_detected
                );
                self.ledger.complete(id, result)
            }
            Err(PipelineError::Job(e)) => {
                log::error!("[Pipeline] [{}] 状态更新失败: {}", id, e);
                Err(e)
            }
            Err(e) => {
                log::error!("[Pipeline] [{}] {}", id, e);
                self.ledger.fail(id, e.to_string())
            }
        }
    }

    fn execute(&self, id: &JobId, request: &RedactionRequest) -> Result<JobResult, PipelineError> {
        self.ledger.advance(id, 10, "检查文件...", None)?;
        check_input(&request.image_path)?;

        self.ledger.advance(id, 20, "加载模型...", None)?;
        let detector = self.detector.get()?;

        self.ledger.advance(id, 30, "读取图片...", None)?;
        let mut image = read_image(&request.image_path)?;
        let (width, height) = image.dimensions();

        self.ledger.advance(id, 50, "检测目标...", None)?;
        let reduction = detect(detector.as_ref(), &image, request)?;
        let summary = apply_redactions(&mut image, &reduction.instructions, &self.blur);
        log::debug!(
            "[Pipeline] [{}] 模糊 {} 个区域，跳过 {} 个",
            id,
            summary.applied,
            summary.skipped
        );

        self.ledger.advance(
            id,
            80,
            "保存结果...",
            Some(StageCounts {
                faces: reduction.faces,
                plates: reduction.plates,
            }),
        )?;
        let output_path = match &request.output_path {
            Some(path) => path.clone(),
            None => default_output_path(&request.image_path)?,
        };
        write_image(&image, &output_path)?;
        log::info!("[Pipeline] [{}] 结果已保存: {}", id, output_path.display());

        if let Some(photo_id) = request.photo_id {
            self.mark_photo(id, photo_id);
        }

        Ok(JobResult {
            input_path: request.image_path.display().to_string(),
            output_path: output_path.display().to_string(),
            photo_id: request.photo_id,
            faces_detected: reduction.faces,
            plates_detected: reduction.plates,
            total_detections: reduction.total_detections(),
            detections: reduction.annotated,
            image_size: ImageSize { width, height },
        })
    }

    /// 输出已写入，标记失败只记录警告
    fn mark_photo(&self, id: &JobId, photo_id: i64) {
        let Some(photos) = &self.photos else {
            log::debug!("[Pipeline] [{}] 未配置照片存储，忽略 photo_id {}", id, photo_id);
            return;
        };
        if let Err(e) = photos.mark_processed(photo_id) {
            log::warn!("[Pipeline] [{}] 标记照片 {} 失败: {}", id, photo_id, e);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("detector", &self.detector)
            .field("blur", &self.blur)
            .field("photos", &self.photos.is_some())
            .finish()
    }
}

fn check_input(path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::InputNotFound(path.to_path_buf()))
    }
}

fn read_image(path: &Path) -> Result<RgbImage, PipelineError> {
    let image = image::open(path).map_err(|e| PipelineError::Decode(format!("{}: {}", path.display(), e)))?;
    Ok(image.to_rgb8())
}

fn detect(
    detector: &dyn Detector,
    image: &RgbImage,
    request: &RedactionRequest,
) -> Result<Reduction, PipelineError> {
    let detections = detector.detect(image)?;
    log::debug!("[Pipeline] {} 检测到 {} 个目标", detector.name(), detections.len());
    Ok(reduce(&detections, &request.policy))
}

/// 默认输出路径：同级 `processed/` 目录下的 `blurred_<文件名>`，目录不存在时创建
pub fn default_output_path(input: &Path) -> Result<PathBuf, PipelineError> {
    let name = input
        .file_name()
        .ok_or_else(|| PipelineError::Encode(format!("无效的输入文件名: {}", input.display())))?;
    let dir = input
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(PROCESSED_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| PipelineError::Encode(format!("创建目录失败 {}: {}", dir.display(), e)))?;

    let mut file_name = std::ffi::OsString::from(OUTPUT_PREFIX);
    file_name.push(name);
    Ok(dir.join(file_name))
}

/// 先写入同目录临时文件再重命名，失败时不留下半成品
fn write_image(image: &RgbImage, output: &Path) -> Result<(), PipelineError> {
    let format = ImageFormat::from_path(output)
        .map_err(|e| PipelineError::Encode(format!("{}: {}", output.display(), e)))?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Encode(format!("创建目录失败 {}: {}", parent.display(), e)))?;
    }

    let tmp = temp_sibling(output);
    if let Err(e) = image.save_with_format(&tmp, format) {
        let _ = std::fs::remove_file(&tmp);
        return Err(PipelineError::Encode(e.to_string()));
    }
    std::fs::rename(&tmp, output).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        PipelineError::Encode(format!("{}: {}", output.display(), e))
    })
}

fn temp_sibling(output: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(output.file_name().unwrap_or_default());
    name.push(".tmp");
    output.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.jpg");
        let output = default_output_path(&input).unwrap();
        assert_eq!(output, dir.path().join("processed").join("blurred_cat.jpg"));
        assert!(dir.path().join("processed").is_dir());
    }

    #[test]
    fn test_temp_sibling_stays_in_directory() {
        let tmp = temp_sibling(Path::new("/data/processed/blurred_a.png"));
        assert_eq!(tmp, PathBuf::from("/data/processed/.blurred_a.png.tmp"));
    }

    #[test]
    fn test_unknown_extension_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.unknownext");
        let image = RgbImage::new(4, 4);
        let err = write_image(&image, &output).unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
        assert!(!output.exists());
        assert!(!temp_sibling(&output).exists());
    }

    #[test]
    fn test_write_image_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("out.png");
        write_image(&RgbImage::new(3, 2), &output).unwrap();
        let decoded = image::open(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert!(!temp_sibling(&output).exists());
    }

    #[test]
    fn test_missing_input_error_message() {
        let err = check_input(Path::new("/nonexistent/photo.jpg")).unwrap_err();
        assert_eq!(err.to_string(), "图片不存在: /nonexistent/photo.jpg");
    }
}
