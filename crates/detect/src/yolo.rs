//! YOLO 目标检测
//!
//! 兼容 v8 风格输出：`[1, 4 + nc, N]`（或转置的 `[1, N, 4 + nc]`），
//! 框格式为模型输入坐标下的 `(cx, cy, w, h)`，无 objectness 分量。

use image::RgbImage;
use ndarray::{ArrayD, ArrayViewD};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use veil_render::PixelBox;
use veil_rules::{Detection, DetectionClass};

use crate::error::DetectError;
use crate::preprocess::{prepare_input, Letterbox};
use crate::threading::SessionThreads;
use crate::Detector;

/// 检测参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct YoloParams {
    /// 方形输入边长
    pub input_size: u32,
    /// 置信度阈值
    pub conf_threshold: f32,
    /// NMS IoU 阈值
    pub iou_threshold: f32,
    /// 最多保留的目标数
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// YOLO 检测器
///
/// ONNX session 推理需要独占访问，用 `Mutex` 串行化
pub struct YoloDetector {
    session: Mutex<Session>,
    params: YoloParams,
}

/// NMS 之前的候选框（原图坐标）
#[derive(Debug, Clone, Copy)]
struct Candidate {
    class: DetectionClass,
    score: f32,
    bbox: [f32; 4],
}

impl YoloDetector {
    /// 从 ONNX 模型文件创建检测器
    ///
    /// 模型文件不可读时返回 [`DetectError::Io`]，不会初始化 ONNX Runtime
    pub fn new(model_path: &Path, params: YoloParams, threads: SessionThreads) -> Result<Self, DetectError> {
        std::fs::File::open(model_path)?;

        let builder = Session::builder()
            .map_err(|e: ort::Error| DetectError::ModelLoad(e.to_string()))?;
        let builder = threads
            .apply(builder)
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| DetectError::ModelLoad(format!("加载检测模型失败: {}", e)))?;

        Ok(Self {
            session: Mutex::new(session),
            params,
        })
    }

    pub fn params(&self) -> &YoloParams {
        &self.params
    }

    fn run(&self, input: ndarray::Array4<f32>) -> Result<ArrayD<f32>, DetectError> {
        let input_tensor = Tensor::from_array(input)
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectError::Inference(format!("获取 session 锁失败: {}", e)))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectError::Inference(format!("检测推理失败: {}", e)))?;

        // 复制数据以避免借用冲突
        let output_view = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        Ok(output_view.to_owned())
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(DetectError::ImageProcess("图像尺寸为 0".to_string()));
        }

        let (input, letterbox) = prepare_input(image, self.params.input_size);
        let output = self.run(input)?;
        decode_output(&output.view(), &letterbox, orig_w, orig_h, &self.params)
    }

    fn name(&self) -> &str {
        "yolo"
    }
}

/// 解码模型输出并做 NMS
pub(crate) fn decode_output(
    output: &ArrayViewD<f32>,
    letterbox: &Letterbox,
    orig_w: u32,
    orig_h: u32,
    params: &YoloParams,
) -> Result<Vec<Detection>, DetectError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(DetectError::Inference(format!("意外的输出形状: {:?}", shape)));
    }

    // 通道数远小于候选数，据此判断是否转置
    let channels_first = shape[1] <= shape[2];
    let (channels, anchors) = if channels_first {
        (shape[1], shape[2])
    } else {
        (shape[2], shape[1])
    };
    if channels < 5 {
        return Err(DetectError::Inference(format!("意外的输出形状: {:?}", shape)));
    }
    let value = |c: usize, a: usize| -> f32 {
        if channels_first {
            output[[0, c, a]]
        } else {
            output[[0, a, c]]
        }
    };

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let (best_class, best_score) = (4..channels)
            .map(|c| (c - 4, value(c, a)))
            .fold((0usize, f32::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if best_score < params.conf_threshold {
            continue;
        }
        let Some(class) = DetectionClass::from_class_id(best_class) else {
            log::trace!("[Detect] 忽略未知类别 {}", best_class);
            continue;
        };

        let (cx, cy, w, h) = (value(0, a), value(1, a), value(2, a), value(3, a));
        let (x1, y1) = letterbox.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_original(cx + w / 2.0, cy + h / 2.0);
        candidates.push(Candidate {
            class,
            score: best_score,
            bbox: [
                x1.clamp(0.0, orig_w as f32),
                y1.clamp(0.0, orig_h as f32),
                x2.clamp(0.0, orig_w as f32),
                y2.clamp(0.0, orig_h as f32),
            ],
        });
    }

    let kept = nms(candidates, params.iou_threshold, params.max_detections);
    log::debug!("[Detect] NMS 后保留 {} 个目标", kept.len());

    Ok(kept
        .into_iter()
        .map(|c| Detection {
            class: c.class,
            confidence: c.score.clamp(0.0, 1.0),
            bbox: PixelBox::new(c.bbox[0] as i32, c.bbox[1] as i32, c.bbox[2] as i32, c.bbox[3] as i32),
        })
        .filter(|d| !d.bbox.is_empty())
        .collect())
}

/// 按类别做非极大值抑制，结果按置信度降序
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep
            .iter()
            .any(|k| k.class == cand.class && iou(&k.bbox, &cand.bbox) > iou_threshold);
        if !suppressed {
            keep.push(cand);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
