//! 区域几何计算
//!
//! 像素坐标框、扩展后的脱敏区域以及羽化尺寸

use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::BlurParams;

/// 像素坐标边界框 `(x1, y1, x2, y2)`，右下角不包含
///
/// 序列化为 `[x1, y1, x2, y2]` 数组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// 宽或高不大于 0
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.width() as i64 * self.height() as i64
    }

    /// 中心点（向下取整）
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x1 + self.x2).div_euclid(2),
            (self.y1 + self.y2).div_euclid(2),
        )
    }

    /// 限制到图像范围内
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    pub fn contains(&self, other: &PixelBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// 平移到以 `origin` 为原点的局部坐标
    pub fn relative_to(&self, origin: &PixelBox) -> Self {
        Self {
            x1: self.x1 - origin.x1,
            y1: self.y1 - origin.y1,
            x2: self.x2 - origin.x1,
            y2: self.y2 - origin.y1,
        }
    }
}

impl From<[i32; 4]> for PixelBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<PixelBox> for [i32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl std::fmt::Display for PixelBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// 脱敏区域
///
/// `expanded` 始终包含 `original`，两者都已限制在图像范围内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedactionZone {
    /// 检测框（已裁剪到图像内）
    pub original: PixelBox,
    /// 实际参与模糊的扩展区域
    pub expanded: PixelBox,
    /// 垂直方向羽化宽度（像素）
    pub feather_h: u32,
    /// 水平方向羽化宽度（像素）
    pub feather_w: u32,
}

impl RedactionZone {
    /// 原始框在扩展区域局部坐标中的位置
    pub fn local_original(&self) -> PixelBox {
        self.original.relative_to(&self.expanded)
    }
}

/// 根据检测框计算脱敏区域
///
/// 以原框中心为中心按 `expansion_factor` 放大，再裁剪到图像边界。
/// 裁剪后为空的区域返回 [`RenderError::GeometryDegenerate`]。
pub fn plan_zone(
    bbox: PixelBox,
    image_w: u32,
    image_h: u32,
    params: &BlurParams,
) -> Result<RedactionZone, RenderError> {
    let original = bbox.clamp_to(image_w, image_h);
    if original.is_empty() {
        return Err(RenderError::GeometryDegenerate { bbox });
    }

    let factor = params.expansion_factor.max(1.0);
    let (cx, cy) = original.center();
    let new_w = (original.width() as f32 * factor) as i32;
    let new_h = (original.height() as f32 * factor) as i32;

    let x1 = cx - new_w / 2;
    let y1 = cy - new_h / 2;
    let expanded = PixelBox::new(x1, y1, x1 + new_w, y1 + new_h).clamp_to(image_w, image_h);
    if expanded.is_empty() {
        return Err(RenderError::GeometryDegenerate { bbox });
    }

    let ratio = params.feather_ratio.max(0.0);
    Ok(RedactionZone {
        original,
        expanded,
        feather_h: (original.height() as f32 * ratio) as u32,
        feather_w: (original.width() as f32 * ratio) as u32,
    })
}
