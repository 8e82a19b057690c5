// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model/engine.rs - 推理引擎
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
  sync::Arc,
};

use candle_core::Device;
use tracing::{info, warn};

use super::{Backbone, EngineError, InferenceResult, ModelHandle};
use crate::{FromUrl, config::EngineConfig};

/// 选择骨干、加载权重、执行分类
#[derive(Debug)]
pub struct InferenceEngine {
  config: EngineConfig,
  device: Device,
}

impl Default for InferenceEngine {
  fn default() -> Self {
    Self::new(EngineConfig::default())
  }
}

impl InferenceEngine {
  pub fn new(config: EngineConfig) -> Self {
    Self {
      config,
      device: Device::Cpu,
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// 按名称选择骨干，名称不在支持列表中时返回 `UnsupportedVariant`
  pub fn select(&self, variant: &str, pretrained: bool) -> Result<Arc<ModelHandle>, EngineError> {
    let backbone: Backbone = variant.parse()?;
    self.select_backbone(backbone, pretrained)
  }

  pub fn select_backbone(&self, backbone: Backbone, pretrained: bool) -> Result<Arc<ModelHandle>, EngineError> {
    info!("选择模型: {} (预训练: {})", backbone, pretrained);
    self.config.validate()?;
    let handle = ModelHandle::new(backbone, self.config.num_classes, &self.device)?;

    if pretrained {
      match self.pretrained_path(backbone) {
        // 加载先校验后写入，失败时句柄仍是初始化参数
        Some(path) => match self.load_weights_file(&handle, &path) {
          Ok(()) => info!("已加载预训练权重 {:?}", path),
          Err(err) => warn!("预训练权重 {:?} 无法加载，使用随机初始化参数: {}", path, err),
        },
        None => warn!("未找到 {} 的预训练权重，使用随机初始化参数", backbone),
      }
    }

    Ok(Arc::new(handle))
  }

  fn pretrained_path(&self, backbone: Backbone) -> Option<PathBuf> {
    let dir = self.config.weights_dir.as_ref()?;
    let path = dir.join(format!("{}.safetensors", backbone.name()));
    path.is_file().then_some(path)
  }

  pub fn load_weights(&self, handle: &ModelHandle, blob: &[u8]) -> Result<(), EngineError> {
    handle.load_weights(blob)
  }

  pub fn load_weights_file(&self, handle: &ModelHandle, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let blob = std::fs::read(path.as_ref())
      .map_err(|err| EngineError::weight_load(format!("{:?}: {}", path.as_ref(), err)))?;
    handle.load_weights(&blob)
  }

  pub fn classify(&self, handle: &ModelHandle, image_bytes: &[u8]) -> Result<InferenceResult, EngineError> {
    handle.classify(image_bytes)
  }

  pub fn save_weights(&self, handle: &ModelHandle, path: impl AsRef<Path>) -> Result<(), EngineError> {
    handle.save_weights(path)
  }
}

/// 通过 URL 描述的模型，例如 `resnet50:///models/w.safetensors?pretrained=false`
///
/// 方案名即骨干名称，路径为可选的权重文件。
#[derive(Debug, Clone)]
pub struct ModelBuilder {
  backbone: Backbone,
  weights: Option<PathBuf>,
  pretrained: bool,
}

impl ModelBuilder {
  pub fn new(backbone: Backbone) -> Self {
    Self {
      backbone,
      weights: None,
      pretrained: true,
    }
  }

  pub fn with_weights(mut self, path: impl Into<PathBuf>) -> Self {
    self.weights = Some(path.into());
    self
  }

  pub fn with_pretrained(mut self, pretrained: bool) -> Self {
    self.pretrained = pretrained;
    self
  }

  pub fn backbone(&self) -> Backbone {
    self.backbone
  }

  pub fn build(&self, engine: &InferenceEngine) -> Result<Arc<ModelHandle>, EngineError> {
    let handle = engine.select_backbone(self.backbone, self.pretrained)?;
    if let Some(path) = &self.weights {
      engine.load_weights_file(&handle, path)?;
      info!("已加载权重文件 {:?}", path);
    }
    Ok(handle)
  }
}

impl FromUrl for ModelBuilder {
  type Error = EngineError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    let backbone: Backbone = url.scheme().parse()?;
    let mut builder = ModelBuilder::new(backbone);

    if !url.path().is_empty() && url.path() != "/" {
      builder = builder.with_weights(url.path());
    }

    for (key, value) in url.query_pairs() {
      if key == "pretrained" {
        builder = builder.with_pretrained(!matches!(value.as_ref(), "false" | "0" | "no"));
      }
    }

    Ok(builder)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::ConfigError, model::TOP_K};
  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
  use std::io::Cursor;

  const NUM_CLASSES: usize = 10;

  fn engine() -> InferenceEngine {
    InferenceEngine::new(EngineConfig {
      weights_dir: None,
      num_classes: NUM_CLASSES,
    })
  }

  fn png(width: u32, height: u32, f: impl Fn(u32, u32) -> Rgb<u8>) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, f);
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  fn gradient() -> Vec<u8> {
    png(320, 240, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]))
  }

  fn stripes() -> Vec<u8> {
    png(256, 300, |x, _| if (x / 16) % 2 == 0 { Rgb([250, 10, 10]) } else { Rgb([5, 5, 200]) })
  }

  #[test]
  fn unknown_variant_is_rejected() {
    let err = engine().select("mobilenet", false).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedVariant(_)));
  }

  #[test]
  fn classify_yields_ranked_predictions_and_maps() {
    let engine = engine();
    let handle = engine.select("resnet18", false).unwrap();
    let result = engine.classify(&handle, &gradient()).unwrap();

    assert_eq!(result.predictions.len(), TOP_K);
    for pair in result.predictions.windows(2) {
      let (a, b) = (pair[0], pair[1]);
      assert!(a.probability > b.probability || (a.probability == b.probability && a.class_id < b.class_id));
    }
    assert!(result.predictions.iter().all(|p| (p.class_id as usize) < NUM_CLASSES));

    let shapes: Vec<_> = result.features.iter().map(|f| (f.layer.as_str(), f.shape())).collect();
    assert_eq!(
      shapes,
      vec![
        ("layer1", [56, 56]),
        ("layer2", [28, 28]),
        ("layer3", [14, 14]),
        ("layer4", [7, 7]),
      ]
    );
    for feature in &result.features {
      assert_eq!(feature.data.len(), feature.height * feature.width);
    }
  }

  #[test]
  fn vgg_captures_block_convolutions() {
    let engine = engine();
    let handle = engine.select("vgg16", false).unwrap();
    let result = engine.classify(&handle, &stripes()).unwrap();

    assert_eq!(result.predictions.len(), TOP_K);
    let shapes: Vec<_> = result.features.iter().map(|f| (f.layer.as_str(), f.shape())).collect();
    assert_eq!(
      shapes,
      vec![
        ("conv2", [112, 112]),
        ("conv3", [56, 56]),
        ("conv4", [28, 28]),
        ("conv5", [14, 14]),
      ]
    );
  }

  #[test]
  fn sequential_calls_do_not_leak_activations() {
    let engine = engine();
    let handle = engine.select("resnet18", false).unwrap();

    let first = engine.classify(&handle, &gradient()).unwrap();
    let _ = engine.classify(&handle, &stripes()).unwrap();
    let again = engine.classify(&handle, &gradient()).unwrap();

    assert_eq!(first.features, again.features);
    assert_eq!(first.predictions, again.predictions);

    // 登记表反映的是最后一次推理
    let latest = handle.feature_map("layer2").unwrap().unwrap();
    assert_eq!(&latest, again.feature("layer2").unwrap());
  }

  #[test]
  fn concurrent_calls_on_one_handle_serialize() {
    let engine = engine();
    let handle = engine.select("resnet18", false).unwrap();
    let images = [gradient(), stripes()];
    let expected: Vec<_> = images.iter().map(|img| handle.classify(img).unwrap()).collect();

    std::thread::scope(|s| {
      let workers: Vec<_> = (0..4)
        .map(|i| {
          let handle = handle.clone();
          let image = &images[i % 2];
          s.spawn(move || (i % 2, handle.classify(image).unwrap()))
        })
        .collect();
      for worker in workers {
        let (idx, result) = worker.join().unwrap();
        assert_eq!(result.features, expected[idx].features);
      }
    });
  }

  #[test]
  fn undecodable_image_is_decode_error() {
    let engine = engine();
    let handle = engine.select("resnet18", false).unwrap();
    let err = engine.classify(&handle, b"\x89PNG broken").unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
    assert!(handle.feature_map("layer1").unwrap().is_none());
  }

  #[test]
  fn thin_strip_image_classifies() {
    let engine = engine();
    let handle = engine.select("resnet18", false).unwrap();
    let strip = png(1, 40_000, |_, y| Rgb([(y % 256) as u8, 40, 90]));

    let result = engine.classify(&handle, &strip).unwrap();
    assert_eq!(result.predictions.len(), TOP_K);
    assert_eq!(result.feature("layer4").unwrap().shape(), [7, 7]);
  }

  #[test]
  fn too_few_classes_is_rejected() {
    let engine = InferenceEngine::new(EngineConfig {
      weights_dir: None,
      num_classes: 3,
    });
    let err = engine.select("resnet18", false).unwrap_err();
    assert!(matches!(
      err,
      EngineError::Config(ConfigError::TooFewClasses { num_classes: 3, .. })
    ));
  }

  #[test]
  fn weights_round_trip_through_safetensors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resnet18.safetensors");
    let engine = engine();

    let source = engine.select("resnet18", false).unwrap();
    engine.save_weights(&source, &path).unwrap();
    let expected = engine.classify(&source, &gradient()).unwrap();

    let target = engine.select("resnet18", false).unwrap();
    let id = target.id();
    engine.load_weights_file(&target, &path).unwrap();
    let loaded = engine.classify(&target, &gradient()).unwrap();

    assert_eq!(target.id(), id);
    assert_eq!(loaded.predictions, expected.predictions);
    assert_eq!(loaded.features, expected.features);
  }

  #[test]
  fn invalid_blob_leaves_handle_usable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resnet18.safetensors");
    let engine = engine();

    let handle = engine.select("vgg16", false).unwrap();
    let before = engine.classify(&handle, &stripes()).unwrap();

    let err = engine.load_weights(&handle, b"not a state dict").unwrap_err();
    assert!(matches!(err, EngineError::WeightLoad(_)));
    assert!(matches!(engine.load_weights(&handle, &[]), Err(EngineError::WeightLoad(_))));

    // 其他骨干的权重缺少 features.* 参数
    let other = engine.select("resnet18", false).unwrap();
    engine.save_weights(&other, &path).unwrap();
    let err = engine.load_weights_file(&handle, &path).unwrap_err();
    assert!(matches!(err, EngineError::WeightLoad(_)));

    let after = engine.classify(&handle, &stripes()).unwrap();
    assert_eq!(before.predictions, after.predictions);
  }

  #[test]
  fn pretrained_weights_come_from_weights_dir() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::new(EngineConfig {
      weights_dir: Some(dir.path().to_path_buf()),
      num_classes: NUM_CLASSES,
    });

    // 目录为空时保留随机初始化
    let seed = engine.select("resnet18", true).unwrap();
    engine.save_weights(&seed, dir.path().join("resnet18.safetensors")).unwrap();
    let expected = engine.classify(&seed, &gradient()).unwrap();

    let pretrained = engine.select("resnet18", true).unwrap();
    let result = engine.classify(&pretrained, &gradient()).unwrap();
    assert_eq!(result.predictions, expected.predictions);
  }

  #[test]
  fn corrupt_pretrained_file_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("vgg16.safetensors"), b"truncated").unwrap();
    let engine = InferenceEngine::new(EngineConfig {
      weights_dir: Some(dir.path().to_path_buf()),
      num_classes: NUM_CLASSES,
    });

    let handle = engine.select("vgg16", true).unwrap();
    let result = engine.classify(&handle, &stripes()).unwrap();
    assert_eq!(result.predictions.len(), TOP_K);
  }

  #[test]
  fn builder_from_url() {
    let url = url::Url::parse("resnet50:///opt/models/w.safetensors?pretrained=false").unwrap();
    let builder = ModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.backbone(), Backbone::ResNet50);
    assert_eq!(builder.weights.as_deref(), Some(Path::new("/opt/models/w.safetensors")));
    assert!(!builder.pretrained);

    let url = url::Url::parse("vgg16:").unwrap();
    let builder = ModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.backbone(), Backbone::Vgg16);
    assert!(builder.weights.is_none());
    assert!(builder.pretrained);

    let url = url::Url::parse("alexnet:").unwrap();
    assert!(ModelBuilder::from_url(&url).is_err());
  }
}
