//! 检测错误类型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("模型加载失败: {0}")]
    ModelLoad(String),

    #[error("图像处理失败: {0}")]
    ImageProcess(String),

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("无法读取模型文件: {0}")]
    Io(#[from] std::io::Error),
}
