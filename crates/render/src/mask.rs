//! 羽化遮罩
//!
//! 遮罩尺寸等于扩展区域，只在原始框内填充：框中心为 1，向边缘线性衰减到 0。

use image::{ImageBuffer, Luma};
use imageproc::filter::separable_filter;

use crate::geometry::RedactionZone;
use crate::kernel::{gaussian_kernel, mask_kernel_size};

/// 单通道 alpha 遮罩，取值 `[0, 1]`
pub type AlphaMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 构建未平滑的羽化遮罩
pub fn feather_mask(zone: &RedactionZone) -> AlphaMask {
    let width = zone.expanded.width().max(0) as u32;
    let height = zone.expanded.height().max(0) as u32;
    let mut mask = AlphaMask::new(width, height);

    let local = zone.local_original();
    let (fh, fw) = (zone.feather_h, zone.feather_w);
    // 某一方向羽化为 0 时只按另一方向做渐变
    let ramp = match (fh, fw) {
        (0, f) | (f, 0) => f,
        (a, b) => a.min(b),
    };

    for y in local.y1..local.y2 {
        for x in local.x1..local.x2 {
            let min_dist = (y - local.y1)
                .min(local.y2 - 1 - y)
                .min(x - local.x1)
                .min(local.x2 - 1 - x)
                .max(0) as u32;

            let alpha = if min_dist >= fh && min_dist >= fw {
                1.0
            } else {
                (min_dist as f32 / ramp as f32).clamp(0.0, 1.0)
            };
            mask.put_pixel(x as u32, y as u32, Luma([alpha]));
        }
    }

    mask
}

/// 平滑核 (水平, 竖直)：水平核由 `feather_h` 决定，竖直核由 `feather_w` 决定
fn smoothing_kernels(feather_h: u32, feather_w: u32) -> (Vec<f32>, Vec<f32>) {
    (
        gaussian_kernel(mask_kernel_size(feather_h), 0.0),
        gaussian_kernel(mask_kernel_size(feather_w), 0.0),
    )
}

/// 对遮罩做二次高斯平滑，消除线性渐变的折角
pub fn smooth_mask(mask: &AlphaMask, feather_h: u32, feather_w: u32) -> AlphaMask {
    let (h_kernel, v_kernel) = smoothing_kernels(feather_h, feather_w);
    if h_kernel.len() == 1 && v_kernel.len() == 1 {
        return mask.clone();
    }
    separable_filter(mask, &h_kernel, &v_kernel)
}
