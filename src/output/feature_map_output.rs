// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/output/feature_map_output.rs - 特征图目录输出
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
  sync::{Mutex, PoisonError},
};

use chrono::{Datelike, Local};
use image::GrayImage;
use serde_json::json;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::EncodedImage,
  model::{FeatureMap, InferenceResult},
  output::{OutputError, Render},
};

/// 将每次推理的特征图保存为灰度 PNG，并附带预测结果 JSON
///
/// 文件布局：`<dir>/<yyyy>/<mm>/<dd>/<HH-MM-SS>-<id>-<layer>.png`
pub struct FeatureMapOutput {
  directory: PathBuf,
  counter: Mutex<u16>,
}

impl FromUrlWithScheme for FeatureMapOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FeatureMapOutput {
  type Error = OutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::new(url.path()))
  }
}

impl FeatureMapOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      counter: Mutex::new(0),
    }
  }

  fn next_id(&self) -> u16 {
    let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  /// 当天目录与本次输出的文件名前缀
  fn prefix(&self) -> Result<(PathBuf, String), OutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let prefix = format!("{}-{:04X}", now.format("%H-%M-%S"), self.next_id());
    Ok((directory, prefix))
  }

  fn save_map(path: &Path, map: &FeatureMap) -> Result<(), OutputError> {
    let image = GrayImage::from_raw(map.width as u32, map.height as u32, map.data.clone())
      .ok_or_else(|| OutputError::InvalidMap(map.layer.clone()))?;
    image.save(path)?;
    Ok(())
  }
}

impl Render<EncodedImage, InferenceResult> for FeatureMapOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &EncodedImage, result: &InferenceResult) -> Result<(), Self::Error> {
    let (directory, prefix) = self.prefix()?;

    for map in &result.features {
      let path = directory.join(format!("{}-{}.png", prefix, map.layer));
      Self::save_map(&path, map)?;
    }

    let record = json!({
      "source": frame.path,
      "predictions": result.predictions,
    });
    let path = directory.join(format!("{}-predictions.json", prefix));
    std::fs::write(&path, serde_json::to_vec_pretty(&record)?)?;

    info!("已保存 {} 张特征图到 {:?}", result.features.len(), directory);
    Ok(())
  }
}
