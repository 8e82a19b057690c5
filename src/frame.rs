// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/frame.rs - 归一化 NCHW 帧定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{
  RgbImage,
  imageops::{self, FilterType},
};

pub const RGB_CHANNELS: usize = 3;

/// 逐通道归一化常量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: [f32; RGB_CHANNELS],
  pub std: [f32; RGB_CHANNELS],
}

/// ImageNet 统计量
pub const IMAGENET_NORMALIZATION: Normalization = Normalization {
  mean: [0.485, 0.456, 0.406],
  std: [0.229, 0.224, 0.225],
};

/// 预处理参数：短边缩放后中心裁剪，再逐通道归一化
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocess {
  pub resize_shorter: u32,
  pub normalization: Normalization,
}

/// 归一化后的 RGB 帧，NCHW 排列的 f32 数据
#[derive(Debug, Clone)]
pub struct NormalizedFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

/// 分类网络的标准输入帧
pub type CropFrame = NormalizedFrame<224, 224>;

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for NormalizedFrame<W, H> {
  type Error = usize;

  /// 长度不匹配时返回实际长度
  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    if data.len() != Self::len() {
      return Err(data.len());
    }
    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for NormalizedFrame<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0f32; Self::len()].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> NormalizedFrame<W, H> {
  const fn len() -> usize {
    RGB_CHANNELS * (W as usize) * (H as usize)
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data.into_vec()
  }

  /// 短边缩放到 `resize_shorter`，中心裁剪为 `W×H`，再按通道归一化
  ///
  /// 裁剪窗口先换算回原图坐标，只缩放窗口内的像素，细长图像不会产生巨大的中间图像。
  pub fn from_image(image: &RgbImage, preprocess: &Preprocess) -> Self {
    let size = preprocess.resize_shorter.max(W).max(H);
    let (left, top, crop_w, crop_h) = center_crop_window(image.dimensions(), size, W, H);
    if crop_w == 0 || crop_h == 0 {
      return Self::default();
    }
    let window = imageops::crop_imm(image, left, top, crop_w, crop_h).to_image();
    let resized = imageops::resize(&window, W, H, FilterType::Triangle);

    let mut frame = Self::default();
    let plane = (W as usize) * (H as usize);
    let Normalization { mean, std } = preprocess.normalization;

    for (w, h, pixel) in resized.enumerate_pixels() {
      let offset = (h as usize) * (W as usize) + (w as usize);
      for c in 0..RGB_CHANNELS {
        let value = pixel[c] as f32 / 255.0;
        frame.data[c * plane + offset] = (value - mean[c]) / std[c];
      }
    }
    frame
  }
}

/// 短边缩放到 `size` 后居中裁剪 `crop_w×crop_h`，返回该窗口在原图中的 `(left, top, width, height)`
///
/// 窗口至少为 1 像素，且不超出原图。
fn center_crop_window((width, height): (u32, u32), size: u32, crop_w: u32, crop_h: u32) -> (u32, u32, u32, u32) {
  let scale = f64::from(width.min(height)) / f64::from(size.max(1));
  let extent = |crop: u32, full: u32| ((f64::from(crop) * scale).round() as u32).max(1).min(full);
  let (window_w, window_h) = (extent(crop_w, width), extent(crop_h, height));
  ((width - window_w) / 2, (height - window_h) / 2, window_w, window_h)
}
