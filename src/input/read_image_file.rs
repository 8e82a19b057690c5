// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{collections::VecDeque, path::PathBuf};

use tracing::{debug, error};
use url::Url;

use super::{EncodedImage, InputError, list_images};
use crate::{FromUrl, FromUrlWithScheme};

/// 单张图像文件，只产出一次
pub struct ImageFileInput {
  image: Option<EncodedImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let image = EncodedImage::read(url.path())?;
    // 提前解码一次，尽早暴露损坏的文件
    image.decode()?;

    Ok(ImageFileInput { image: Some(image) })
  }
}

impl Iterator for ImageFileInput {
  type Item = EncodedImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录中的全部图像，按文件名顺序逐张读取
pub struct ImageDirectoryInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut images = list_images(url.path())?;
    images.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("目录 {} 中找到 {} 张图像", url.path(), images.len());

    Ok(ImageDirectoryInput {
      pending: images.into_iter().map(|info| info.path).collect(),
    })
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = EncodedImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match EncodedImage::read(&path) {
        Ok(image) => return Some(image),
        Err(e) => error!("读取图像 {} 失败: {}", path.display(), e),
      }
    }
    None
  }
}
