// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model/handle.rs - 已加载模型句柄
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
  path::Path,
  sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
};

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use super::{
  Backbone, EngineError, FeatureMap, InferenceResult, Model, TOP_K,
  backbone::Network,
  capture::ActivationRegistry,
  postprocess::{feature_map, top_k},
};
use crate::{
  frame::{CropFrame, Preprocess},
  input::{EncodedImage, decode_image},
};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// 一个已加载的分类器
///
/// 激活登记表由互斥锁保护，同一句柄上的并发推理会串行执行；
/// 不同句柄之间互不影响。
pub struct ModelHandle {
  id: u64,
  backbone: Backbone,
  preprocess: Preprocess,
  device: Device,
  varmap: VarMap,
  network: Network,
  registry: Mutex<ActivationRegistry>,
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("id", &self.id)
      .field("backbone", &self.backbone)
      .finish_non_exhaustive()
  }
}

impl ModelHandle {
  pub(crate) fn new(backbone: Backbone, num_classes: usize, device: &Device) -> Result<Self, EngineError> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let network = Network::new(backbone, num_classes, vb)?;

    let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
    info!("创建模型句柄 #{}: {}", id, backbone);

    Ok(Self {
      id,
      backbone,
      preprocess: backbone.preprocess(),
      device: device.clone(),
      varmap,
      network,
      registry: Mutex::new(ActivationRegistry::default()),
    })
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn backbone(&self) -> Backbone {
    self.backbone
  }

  pub fn preprocess(&self) -> &Preprocess {
    &self.preprocess
  }

  fn registry(&self) -> MutexGuard<'_, ActivationRegistry> {
    self.registry.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 解码、预处理、前向计算并整理结果
  pub fn classify(&self, image_bytes: &[u8]) -> Result<InferenceResult, EngineError> {
    let image = decode_image(image_bytes)?;
    let frame = CropFrame::from_image(&image, &self.preprocess);
    let (h, w, c) = (frame.height(), frame.width(), frame.channels());
    let input = Tensor::from_vec(frame.into_vec(), (1, c, h, w), &self.device)?;

    let mut registry = self.registry();
    registry.clear();
    let logits = match self.network.forward(&input, &mut registry) {
      Ok(logits) => logits,
      Err(err) => {
        registry.clear();
        return Err(err.into());
      }
    };

    let probabilities = candle_nn::ops::softmax(&logits, D::Minus1)?
      .squeeze(0)?
      .to_vec1::<f32>()?;
    let predictions = top_k(&probabilities, TOP_K);

    let mut features = Vec::with_capacity(4);
    for layer in self.backbone.capture_points() {
      let activation = registry
        .get(layer)
        .ok_or_else(|| EngineError::Inference(format!("未捕获到层 {}", layer)))?;
      features.push(feature_map(layer, activation)?);
    }
    debug!("句柄 #{} 推理完成, top1: {:?}", self.id, predictions.first());

    Ok(InferenceResult {
      features,
      predictions,
    })
  }

  /// 最近一次推理中该层的特征图；尚未推理时返回 `None`
  pub fn feature_map(&self, layer: &str) -> Result<Option<FeatureMap>, EngineError> {
    let registry = self.registry();
    match registry.get(layer) {
      Some(activation) => Ok(Some(feature_map(layer, activation)?)),
      None => Ok(None),
    }
  }

  /// 从 safetensors 数据替换全部参数
  ///
  /// 先校验所有参数的名称与形状，全部通过后才写入；失败时句柄保持原状。
  pub fn load_weights(&self, blob: &[u8]) -> Result<(), EngineError> {
    if blob.is_empty() {
      return Err(EngineError::weight_load("权重数据为空"));
    }
    debug!("句柄 #{} 读取权重 {} 字节", self.id, blob.len());

    let tensors = candle_core::safetensors::load_buffer(blob, &self.device)
      .map_err(EngineError::weight_load)?;

    // 持有登记表锁，避免与推理交错
    let mut registry = self.registry();
    let vars = self.varmap.data().lock().unwrap_or_else(PoisonError::into_inner);

    let mut staged = Vec::with_capacity(vars.len());
    for (name, var) in vars.iter() {
      let tensor = tensors
        .get(name)
        .ok_or_else(|| EngineError::weight_load(format!("缺少参数 {}", name)))?;
      if tensor.dims() != var.dims() {
        return Err(EngineError::weight_load(format!(
          "参数 {} 形状不匹配: 期望 {:?}, 实际 {:?}",
          name,
          var.dims(),
          tensor.dims()
        )));
      }
      let tensor = tensor.to_dtype(DType::F32).map_err(EngineError::weight_load)?;
      staged.push((var, tensor));
    }

    for (var, tensor) in staged {
      var.set(&tensor).map_err(EngineError::weight_load)?;
    }
    registry.clear();

    info!("句柄 #{} 已加载 {} 个参数", self.id, vars.len());
    Ok(())
  }

  /// 以 safetensors 格式导出当前参数
  pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
    self.varmap.save(path.as_ref()).map_err(EngineError::weight_load)?;
    info!("句柄 #{} 权重已保存到 {:?}", self.id, path.as_ref());
    Ok(())
  }
}

impl Model for ModelHandle {
  type Input = EncodedImage;
  type Output = InferenceResult;
  type Error = EngineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.classify(&input.bytes)
  }
}
