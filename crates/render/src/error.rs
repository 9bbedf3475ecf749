//! 合成错误类型

use thiserror::Error;

use crate::geometry::PixelBox;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// 裁剪到图像范围后区域为空，调用方按空操作处理
    #[error("脱敏区域退化为空: {bbox}")]
    GeometryDegenerate { bbox: PixelBox },
}
