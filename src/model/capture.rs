// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model/capture.rs - 中间激活捕获
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

use std::collections::HashMap;

use candle_core::Tensor;

/// 层名到该层最近一次输出的映射
///
/// 前向计算显式接收 `&mut ActivationRegistry`，每个阶段自行写入。
#[derive(Debug, Default)]
pub struct ActivationRegistry {
  entries: HashMap<&'static str, Tensor>,
}

impl ActivationRegistry {
  pub fn record(&mut self, layer: &'static str, output: &Tensor) {
    self.entries.insert(layer, output.clone());
  }

  pub fn get(&self, layer: &str) -> Option<&Tensor> {
    self.entries.get(layer)
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn layers(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.entries.keys().copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use candle_core::Device;

  #[test]
  fn record_overwrites_slot() {
    let mut registry = ActivationRegistry::default();
    let first = Tensor::zeros((1, 1, 2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
    let second = Tensor::ones((1, 1, 2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();

    registry.record("layer1", &first);
    registry.record("layer1", &second);
    assert_eq!(registry.len(), 1);

    let stored = registry.get("layer1").unwrap().flatten_all().unwrap();
    assert_eq!(stored.to_vec1::<f32>().unwrap(), vec![1.0; 4]);

    registry.clear();
    assert!(registry.is_empty());
    assert!(registry.get("layer1").is_none());
  }
}
