//! Feathered Gaussian blur compositing for redaction regions.
//!
//! 对检测框做扩展、构建羽化遮罩、模糊并与原图混合

mod error;
mod geometry;
mod kernel;
mod mask;

pub use error::RenderError;
pub use geometry::{plan_zone, PixelBox, RedactionZone};
pub use kernel::{blur_kernel_size, gaussian_kernel, mask_kernel_size, MAX_BLUR_KERNEL, MAX_MASK_KERNEL};
pub use mask::{feather_mask, smooth_mask, AlphaMask};

use image::{imageops, ImageBuffer, Rgb, RgbImage};
use imageproc::filter::separable_filter;
use serde::{Deserialize, Serialize};

/// 模糊参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct BlurParams {
    /// 基础高斯核尺寸 (宽, 高)，会按扩展系数放大
    pub kernel_size: (u32, u32),
    /// 基础 sigma，会按扩展系数放大
    pub sigma: f32,
    /// 羽化比例 (0.0 - 0.5)
    pub feather_ratio: f32,
    /// 扩展系数，>= 1
    pub expansion_factor: f32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            kernel_size: (99, 99),
            sigma: 30.0,
            feather_ratio: 0.1,
            expansion_factor: 2.0,
        }
    }
}

type RgbImageF32 = ImageBuffer<Rgb<f32>, Vec<f32>>;

/// 批量脱敏统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedactionSummary {
    pub applied: usize,
    pub skipped: usize,
}

/// 对单个检测框做羽化模糊，直接修改 `image`
///
/// 区域退化时返回 [`RenderError::GeometryDegenerate`]，图像保持不变。
pub fn blur_region(
    image: &mut RgbImage,
    bbox: PixelBox,
    params: &BlurParams,
) -> Result<RedactionZone, RenderError> {
    let zone = plan_zone(bbox, image.width(), image.height(), params)?;
    let ex = zone.expanded;
    let (area_w, area_h) = (ex.width() as u32, ex.height() as u32);

    let area = imageops::crop_imm(&*image, ex.x1 as u32, ex.y1 as u32, area_w, area_h).to_image();
    // 两遍卷积都在 f32 上进行，只在最终混合时取整一次
    let area_f32: RgbImageF32 = ImageBuffer::from_fn(area_w, area_h, |x, y| Rgb(area.get_pixel(x, y).0.map(f32::from)));

    let factor = params.expansion_factor.max(1.0);
    let kw = blur_kernel_size(params.kernel_size.0, factor);
    let kh = blur_kernel_size(params.kernel_size.1, factor);
    let sigma = params.sigma * factor;
    let blurred = separable_filter(&area_f32, &gaussian_kernel(kw, sigma), &gaussian_kernel(kh, sigma));

    let mask = smooth_mask(&feather_mask(&zone), zone.feather_h, zone.feather_w);

    for (x, y, orig) in area.enumerate_pixels() {
        let alpha = mask.get_pixel(x, y)[0].clamp(0.0, 1.0);
        if alpha == 0.0 {
            continue;
        }
        let blur = blurred.get_pixel(x, y);
        let mixed = Rgb([0usize, 1, 2].map(|c| {
            (orig[c] as f32 * (1.0 - alpha) + blur[c] * alpha).round().clamp(0.0, 255.0) as u8
        }));
        image.put_pixel(ex.x1 as u32 + x, ex.y1 as u32 + y, mixed);
    }

    log::debug!(
        "[Render] 模糊区域 {} -> {} (核 {}x{}, 羽化 {}x{})",
        zone.original,
        zone.expanded,
        kw,
        kh,
        zone.feather_w,
        zone.feather_h
    );
    Ok(zone)
}

/// 依次对多个检测框做模糊，退化的框跳过
pub fn apply_redactions(image: &mut RgbImage, boxes: &[PixelBox], params: &BlurParams) -> RedactionSummary {
    let mut summary = RedactionSummary::default();
    for bbox in boxes {
        match blur_region(image, *bbox, params) {
            Ok(_) => summary.applied += 1,
            Err(e) => {
                log::debug!("[Render] 跳过: {}", e);
                summary.skipped += 1;
            }
        }
    }
    summary
}
