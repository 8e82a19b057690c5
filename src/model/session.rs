// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model/session.rs - 本地检视会话
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

use std::{path::Path, sync::Arc};

use tracing::{info, warn};

use super::{EngineError, InferenceEngine, InferenceResult, ModelHandle};
use crate::input::EncodedImage;

/// 每个会话只持有一个活动句柄，重新选择即整体替换
pub struct InspectionSession {
  engine: Arc<InferenceEngine>,
  handle: Option<Arc<ModelHandle>>,
  pretrained: bool,
}

impl InspectionSession {
  pub fn new(engine: Arc<InferenceEngine>) -> Self {
    Self {
      engine,
      handle: None,
      pretrained: true,
    }
  }

  pub fn with_pretrained(mut self, pretrained: bool) -> Self {
    self.pretrained = pretrained;
    self
  }

  pub fn handle(&self) -> Option<&Arc<ModelHandle>> {
    self.handle.as_ref()
  }

  pub fn select_model(&mut self, variant: &str) -> Result<Arc<ModelHandle>, EngineError> {
    let handle = self.engine.select(variant, self.pretrained)?;
    self.handle = Some(handle.clone());
    Ok(handle)
  }

  /// 在同一骨干的新句柄上加载权重，成功后才替换当前句柄
  pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<Arc<ModelHandle>, EngineError> {
    let current = self.handle.as_ref().ok_or(EngineError::NoModelSelected)?;
    let fresh = self.engine.select_backbone(current.backbone(), false)?;

    if let Err(err) = self.engine.load_weights_file(&fresh, path.as_ref()) {
      warn!("权重加载失败，保留当前模型: {}", err);
      return Err(err);
    }

    info!("会话模型已替换为句柄 #{}", fresh.id());
    self.handle = Some(fresh.clone());
    Ok(fresh)
  }

  pub fn analyze(&self, path: impl AsRef<Path>) -> Result<InferenceResult, EngineError> {
    let handle = self.handle.as_ref().ok_or(EngineError::NoModelSelected)?;
    let image = EncodedImage::read(path.as_ref())?;
    self.engine.classify(handle, &image.bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::EngineConfig, model::TOP_K};
  use image::{Rgb, RgbImage};

  fn session() -> InspectionSession {
    let engine = InferenceEngine::new(EngineConfig {
      weights_dir: None,
      num_classes: 6,
    });
    InspectionSession::new(Arc::new(engine)).with_pretrained(false)
  }

  #[test]
  fn analyze_requires_a_model() {
    let session = session();
    assert!(matches!(session.analyze("missing.png"), Err(EngineError::NoModelSelected)));
  }

  #[test]
  fn selection_replaces_handle() {
    let mut session = session();
    let first = session.select_model("resnet18").unwrap();
    let second = session.select_model("vgg16").unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(session.handle().unwrap().id(), second.id());

    assert!(session.select_model("unknown").is_err());
    assert_eq!(session.handle().unwrap().id(), second.id());
  }

  #[test]
  fn failed_weight_load_keeps_prior_handle() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.safetensors");
    std::fs::write(&bad, b"garbage").unwrap();
    let image_path = dir.path().join("sample.png");
    RgbImage::from_pixel(240, 240, Rgb([40, 90, 160])).save(&image_path).unwrap();

    let mut session = session();
    let handle = session.select_model("resnet18").unwrap();
    assert!(session.load_weights(&bad).is_err());
    assert_eq!(session.handle().unwrap().id(), handle.id());

    let result = session.analyze(&image_path).unwrap();
    assert_eq!(result.features.len(), 4);
    assert_eq!(result.predictions.len(), TOP_K);

    let good = dir.path().join("good.safetensors");
    handle.save_weights(&good).unwrap();
    let reloaded = session.load_weights(&good).unwrap();
    assert_ne!(reloaded.id(), handle.id());
    assert_eq!(session.analyze(&image_path).unwrap().predictions, result.predictions);
  }
}
