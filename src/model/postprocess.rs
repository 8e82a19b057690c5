// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model/postprocess.rs - 推理结果后处理
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

use candle_core::Tensor;
use tracing::debug;

use crate::model::{FeatureMap, Prediction};

/// 取概率最高的 `k` 个类别，概率相同时按类别号升序
pub fn top_k(probabilities: &[f32], k: usize) -> Vec<Prediction> {
  let mut order: Vec<usize> = (0..probabilities.len()).collect();
  order.sort_by(|&a, &b| {
    probabilities[b]
      .total_cmp(&probabilities[a])
      .then_with(|| a.cmp(&b))
  });

  order
    .into_iter()
    .take(k)
    .map(|idx| Prediction {
      class_id: idx as u32,
      probability: probabilities[idx],
    })
    .collect()
}

/// 最小-最大归一化到 [0, 255]；最大值等于最小值时输出全零
pub fn normalize_map(values: &[f32]) -> Vec<u8> {
  let (min, max) = values
    .iter()
    .filter(|v| v.is_finite())
    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
      (lo.min(v), hi.max(v))
    });

  let range = max - min;
  if !range.is_finite() || range <= 0.0 {
    return vec![0; values.len()];
  }

  values
    .iter()
    .map(|&v| {
      if v.is_finite() {
        ((v - min) / range * 255.0).clamp(0.0, 255.0) as u8
      } else {
        0
      }
    })
    .collect()
}

/// 从 `(1, C, H, W)` 的激活中取第一通道并归一化
pub(crate) fn feature_map(layer: &str, activation: &Tensor) -> candle_core::Result<FeatureMap> {
  let plane = activation.get(0)?.get(0)?;
  let (height, width) = plane.dims2()?;
  let values = plane.flatten_all()?.to_vec1::<f32>()?;
  debug!("特征图 {}: {}x{}", layer, height, width);

  Ok(FeatureMap {
    layer: layer.to_string(),
    height,
    width,
    data: normalize_map(&values),
  })
}
