// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  config::ConfigError,
  frame::{IMAGENET_NORMALIZATION, Preprocess},
  input::InputError,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("图像解码错误: {0}")]
  Decode(#[from] InputError),
  #[error("不支持的模型类型: {0}")]
  UnsupportedVariant(String),
  #[error("权重加载错误: {0}")]
  WeightLoad(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("尚未选择模型")]
  NoModelSelected,
  #[error(transparent)]
  Config(#[from] ConfigError),
}

impl From<candle_core::Error> for EngineError {
  fn from(err: candle_core::Error) -> Self {
    EngineError::Inference(err.to_string())
  }
}

impl From<image::ImageError> for EngineError {
  fn from(err: image::ImageError) -> Self {
    EngineError::Decode(InputError::DecodeError(err))
  }
}

impl From<std::io::Error> for EngineError {
  fn from(err: std::io::Error) -> Self {
    EngineError::Decode(InputError::IoError(err))
  }
}

impl EngineError {
  pub fn weight_load(msg: impl fmt::Display) -> Self {
    EngineError::WeightLoad(msg.to_string())
  }
}

/// 每次推理返回的候选数量
pub const TOP_K: usize = 5;

const RESIZE_SHORTER: u32 = 256;
const RESNET_CAPTURE_POINTS: [&str; 4] = ["layer1", "layer2", "layer3", "layer4"];
const VGG_CAPTURE_POINTS: [&str; 4] = ["conv2", "conv3", "conv4", "conv5"];

/// 支持的骨干网络
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
  ResNet18,
  ResNet34,
  ResNet50,
  Vgg16,
}

impl Backbone {
  pub const ALL: [Backbone; 4] = [
    Backbone::ResNet18,
    Backbone::ResNet34,
    Backbone::ResNet50,
    Backbone::Vgg16,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Backbone::ResNet18 => "resnet18",
      Backbone::ResNet34 => "resnet34",
      Backbone::ResNet50 => "resnet50",
      Backbone::Vgg16 => "vgg16",
    }
  }

  /// 被捕获激活的四个最深阶段
  pub fn capture_points(&self) -> [&'static str; 4] {
    match self {
      Backbone::ResNet18 | Backbone::ResNet34 | Backbone::ResNet50 => RESNET_CAPTURE_POINTS,
      Backbone::Vgg16 => VGG_CAPTURE_POINTS,
    }
  }

  pub fn preprocess(&self) -> Preprocess {
    Preprocess {
      resize_shorter: RESIZE_SHORTER,
      normalization: IMAGENET_NORMALIZATION,
    }
  }
}

impl fmt::Display for Backbone {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Backbone {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Backbone::ALL
      .into_iter()
      .find(|b| b.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| EngineError::UnsupportedVariant(s.to_string()))
  }
}

pub fn available_models() -> Vec<&'static str> {
  Backbone::ALL.iter().map(Backbone::name).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub class_id: u32,
  pub probability: f32,
}

/// 单层特征图，取第一通道并归一化到 [0, 255]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureMap {
  pub layer: String,
  pub height: usize,
  pub width: usize,
  /// 行优先
  pub data: Vec<u8>,
}

impl FeatureMap {
  pub fn shape(&self) -> [usize; 2] {
    [self.height, self.width]
  }

  pub fn rows(&self) -> Vec<Vec<u8>> {
    if self.width == 0 {
      return Vec::new();
    }
    self.data.chunks(self.width).map(<[u8]>::to_vec).collect()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
  /// 按捕获点顺序排列
  pub features: Vec<FeatureMap>,
  /// 概率降序，概率相同时类别号小者在前
  pub predictions: Vec<Prediction>,
}

impl InferenceResult {
  pub fn feature(&self, layer: &str) -> Option<&FeatureMap> {
    self.features.iter().find(|f| f.layer == layer)
  }

  pub fn top1(&self) -> Option<Prediction> {
    self.predictions.first().copied()
  }
}

mod backbone;
mod capture;
mod engine;
mod handle;
mod postprocess;
mod session;

pub use self::capture::ActivationRegistry;
pub use self::engine::{InferenceEngine, ModelBuilder};
pub use self::handle::ModelHandle;
pub use self::postprocess::{normalize_map, top_k};
pub use self::session::InspectionSession;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backbone_names_round_trip() {
    for backbone in Backbone::ALL {
      assert_eq!(backbone.name().parse::<Backbone>().unwrap(), backbone);
    }
    assert_eq!("ResNet50".parse::<Backbone>().unwrap(), Backbone::ResNet50);
  }

  #[test]
  fn unknown_backbone_is_unsupported() {
    let err = "residue_detection".parse::<Backbone>().unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedVariant(name) if name == "residue_detection"));
  }

  #[test]
  fn capture_points_follow_family() {
    assert_eq!(
      Backbone::ResNet34.capture_points(),
      ["layer1", "layer2", "layer3", "layer4"]
    );
    assert_eq!(
      Backbone::Vgg16.capture_points(),
      ["conv2", "conv3", "conv4", "conv5"]
    );
  }

  #[test]
  fn feature_map_rows() {
    let map = FeatureMap {
      layer: "layer4".to_string(),
      height: 2,
      width: 3,
      data: vec![0, 1, 2, 3, 4, 5],
    };
    assert_eq!(map.shape(), [2, 3]);
    assert_eq!(map.rows(), vec![vec![0, 1, 2], vec![3, 4, 5]]);
  }
}
