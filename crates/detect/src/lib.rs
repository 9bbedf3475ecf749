//! 目标检测
//!
//! 基于 ONNX Runtime 的 YOLO 人脸/车牌检测，以及进程级的延迟加载句柄

mod error;
mod handle;
mod preprocess;
mod threading;
mod yolo;

pub use error::DetectError;
pub use handle::DetectorHandle;
pub use preprocess::{prepare_input, Letterbox};
pub use threading::{SessionThreads, ThreadConfig, INTER_THREADS_ENV, THREADS_ENV};
pub use yolo::{YoloDetector, YoloParams};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use veil_rules::Detection;

/// 检测器统一 trait
///
/// 实现需可在线程间共享；内部需要可变状态时自行加锁
pub trait Detector: Send + Sync {
    /// 检测图像中的人脸与车牌
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError>;

    /// 用于日志
    fn name(&self) -> &str {
        "detector"
    }
}

/// 检测引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// ONNX 模型路径
    pub model_path: String,
    /// 推理参数
    #[serde(default)]
    pub params: YoloParams,
    /// session 线程数，未设置时读取环境变量
    #[serde(default)]
    pub threads: ThreadConfig,
}

/// 检查模型文件是否存在
pub fn is_model_installed(config: &DetectorConfig) -> bool {
    Path::new(&config.model_path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_params() {
        let config: DetectorConfig = serde_json::from_str(r#"{"modelPath": "models/plates.onnx"}"#).unwrap();
        assert_eq!(config.params, YoloParams::default());
        assert_eq!(config.threads, ThreadConfig::default());
        assert!(!is_model_installed(&config));
    }
}
