//! 高斯核

/// 主模糊核的最大边长，避免超大区域耗时过长
pub const MAX_BLUR_KERNEL: u32 = 199;
/// 遮罩平滑核的最大边长
pub const MAX_MASK_KERNEL: u32 = 51;

/// 按扩展系数放大模糊核，强制为奇数并限制上限
pub fn blur_kernel_size(base: u32, expansion_factor: f32) -> u32 {
    let scaled = (base as f32 * expansion_factor.max(1.0)) as u32;
    (scaled | 1).min(MAX_BLUR_KERNEL)
}

/// 遮罩平滑核：`min(2 * feather + 1, 51)`，奇数
pub fn mask_kernel_size(feather: u32) -> u32 {
    feather.saturating_mul(2).saturating_add(1).min(MAX_MASK_KERNEL) | 1
}

/// 一维归一化高斯核
///
/// `sigma <= 0` 时由核长推导：`0.3 * ((size - 1) * 0.5 - 1) + 0.8`
pub fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let size = size.max(1) as usize;
    if size == 1 {
        return vec![1.0];
    }

    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size - 1) as f32 / 2.0;
    let denom = 2.0 * sigma * sigma;

    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in kernel.iter_mut() {
        *w /= sum;
    }
    kernel
}
