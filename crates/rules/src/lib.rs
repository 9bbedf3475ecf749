//! Detection classes, redaction policy and detection reduction.

use serde::{Deserialize, Serialize};
use veil_render::PixelBox;

/// 检测类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionClass {
    /// 人脸（模型类别 0）
    Face,
    /// 车牌（模型类别 1）
    LicensePlate,
}

impl DetectionClass {
    /// 模型输出类别 id 转换，未知类别返回 `None`
    pub fn from_class_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(Self::Face),
            1 => Some(Self::LicensePlate),
            _ => None,
        }
    }

    pub fn class_id(&self) -> usize {
        match self {
            Self::Face => 0,
            Self::LicensePlate => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::LicensePlate => "license_plate",
        }
    }
}

impl std::fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 检测器输出的单个目标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: DetectionClass,
    /// 置信度 `[0, 1]`
    pub confidence: f32,
    /// 像素坐标
    pub bbox: PixelBox,
}

/// 按类别启用/禁用脱敏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionPolicy {
    pub blur_faces: bool,
    pub blur_plates: bool,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            blur_faces: true,
            blur_plates: true,
        }
    }
}

impl RedactionPolicy {
    pub fn is_enabled(&self, class: DetectionClass) -> bool {
        match class {
            DetectionClass::Face => self.blur_faces,
            DetectionClass::LicensePlate => self.blur_plates,
        }
    }
}

/// 审计记录：无论是否脱敏都会保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDetection {
    pub class: DetectionClass,
    /// 保留三位小数
    pub confidence: f32,
    pub bbox: PixelBox,
}

/// 归约结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reduction {
    /// 需要模糊的框，保持检测顺序
    pub instructions: Vec<PixelBox>,
    /// 被选中脱敏的人脸数
    pub faces: u32,
    /// 被选中脱敏的车牌数
    pub plates: u32,
    /// 全部检测的审计记录
    pub annotated: Vec<AnnotatedDetection>,
}

impl Reduction {
    pub fn total_detections(&self) -> usize {
        self.annotated.len()
    }
}

/// 将检测结果归约为脱敏指令与统计
pub fn reduce(detections: &[Detection], policy: &RedactionPolicy) -> Reduction {
    let mut reduction = Reduction::default();

    for det in detections {
        reduction.annotated.push(AnnotatedDetection {
            class: det.class,
            confidence: round_confidence(det.confidence),
            bbox: det.bbox,
        });

        if !policy.is_enabled(det.class) {
            log::debug!("[Rules] 未启用 {}，保留: {}", det.class, det.bbox);
            continue;
        }

        reduction.instructions.push(det.bbox);
        match det.class {
            DetectionClass::Face => reduction.faces += 1,
            DetectionClass::LicensePlate => reduction.plates += 1,
        }
        log::debug!(
            "[Rules] 选中 {}: {}, 置信度: {:.2}",
            det.class,
            det.bbox,
            det.confidence
        );
    }

    reduction
}

fn round_confidence(confidence: f32) -> f32 {
    (confidence * 1000.0).round() / 1000.0
}
