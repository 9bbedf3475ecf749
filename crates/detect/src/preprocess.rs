//! 图像预处理模块
//!
//! YOLO 模型要求等比缩放 + 灰边填充 (letterbox) 的方形输入

use image::{imageops, ImageBuffer, Rgb, RgbImage};
use ndarray::{Array3, Array4};

/// 填充颜色
const PAD_VALUE: u8 = 114;

/// letterbox 变换参数，用于把模型坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// 计算 `(w, h)` 缩放到 `input_size` 方形输入时的变换
    pub fn fit(w: u32, h: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / w.max(1) as f32).min(input_size as f32 / h.max(1) as f32);
        let (new_w, new_h) = scaled_dims(w, h, scale);
        Self {
            scale,
            pad_x: (input_size.saturating_sub(new_w) / 2) as f32,
            pad_y: (input_size.saturating_sub(new_h) / 2) as f32,
        }
    }

    /// 模型输入坐标 -> 原图坐标
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

fn scaled_dims(w: u32, h: u32, scale: f32) -> (u32, u32) {
    (
        ((w as f32 * scale).round() as u32).max(1),
        ((h as f32 * scale).round() as u32).max(1),
    )
}

/// 为检测模型准备输入
///
/// 1. 等比缩放，长边等于 `input_size`
/// 2. 居中填充为方形
/// 3. 归一化到 `[0, 1]`，NCHW，RGB 顺序
pub fn prepare_input(img: &RgbImage, input_size: u32) -> (Array4<f32>, Letterbox) {
    let (w, h) = img.dimensions();
    let letterbox = Letterbox::fit(w, h, input_size);
    let (new_w, new_h) = scaled_dims(w, h, letterbox.scale);

    let resized = imageops::resize(img, new_w, new_h, imageops::FilterType::Triangle);

    let mut padded: RgbImage =
        ImageBuffer::from_pixel(input_size, input_size, Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]));
    imageops::overlay(
        &mut padded,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    let tensor = normalize_image(&padded);
    (tensor.insert_axis(ndarray::Axis(0)), letterbox)
}

/// 将 RGB 图像归一化为 CHW 格式的 tensor
fn normalize_image(img: &RgbImage) -> Array3<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut tensor = Array3::<f32>::zeros((3, h, w));

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_wide_image() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);

        let (x, y) = lb.to_original(320.0, 140.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!(y.abs() < 1e-3);
    }

    #[test]
    fn test_prepare_input_shape_and_padding() {
        let img = RgbImage::from_pixel(400, 300, Rgb([255, 0, 0]));
        let (tensor, lb) = prepare_input(&img, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 8.0);

        // 填充区
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        // 图像区
        assert!((tensor[[0, 0, 32, 32]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 32, 32]].abs() < 1e-6);
    }
}
