// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;

use crate::FromUrl;

mod read_image_file;
mod static_images;

pub use self::read_image_file::{ImageDirectoryInput, ImageFileInput};
pub use self::static_images::{ImageInfo, is_image_file, list_images};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("图像尺寸无效: {0}x{1}")]
  EmptyImage(u32, u32),
}

/// 未解码的图像字节及其来源
#[derive(Debug, Clone)]
pub struct EncodedImage {
  pub path: PathBuf,
  pub bytes: Vec<u8>,
}

impl EncodedImage {
  pub fn read(path: impl Into<PathBuf>) -> Result<Self, InputError> {
    let path = path.into();
    let bytes = std::fs::read(&path)?;
    Ok(Self { path, bytes })
  }

  pub fn decode(&self) -> Result<RgbImage, InputError> {
    decode_image(&self.bytes)
  }
}

/// 将 PNG/JPEG/BMP 字节解码为 RGB 图像，不处理色彩配置
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, InputError> {
  let image = image::load_from_memory(bytes)?.to_rgb8();
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(InputError::EmptyImage(width, height));
  }
  Ok(image)
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageDirectory(ImageDirectoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageDirectoryInput::SCHEME => Ok(InputWrapper::ImageDirectory(
        ImageDirectoryInput::from_url(url)?,
      )),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = EncodedImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::ImageDirectory(input) => input.next(),
    }
  }
}
