// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/input/static_images.rs - 静态图像目录列举
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

use std::{
  path::{Path, PathBuf},
  time::UNIX_EPOCH,
};

use serde::{Deserialize, Serialize};
use tracing::error;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 图像文件元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
  pub path: PathBuf,
  pub name: String,
  /// 修改时间，自 UNIX 纪元以来的秒数
  pub time: f64,
  /// 字节数
  pub size: u64,
}

pub fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

fn image_info(path: &Path) -> std::io::Result<ImageInfo> {
  let metadata = std::fs::metadata(path)?;
  let time = metadata
    .modified()?
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or_default();

  Ok(ImageInfo {
    path: path.to_path_buf(),
    name: path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default(),
    time,
    size: metadata.len(),
  })
}

/// 列出目录中的图像文件；目录不存在时返回空列表，单个文件读取失败时跳过
pub fn list_images(dir: impl AsRef<Path>) -> std::io::Result<Vec<ImageInfo>> {
  let dir = dir.as_ref();
  if !dir.exists() {
    return Ok(Vec::new());
  }

  let mut images = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    if !path.is_file() || !is_image_file(&path) {
      continue;
    }
    match image_info(&path) {
      Ok(info) => images.push(info),
      Err(e) => error!("获取图像信息失败 {}: {}", path.display(), e),
    }
  }
  Ok(images)
}
