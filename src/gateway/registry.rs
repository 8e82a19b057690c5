// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/gateway/registry.rs - 已加载模型登记
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
  collections::HashMap,
  sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Backbone, ModelHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistryEntry {
  pub path: String,
  #[serde(rename = "type")]
  pub model_type: Backbone,
  pub loaded_time: DateTime<Local>,
}

type Slot = (ModelRegistryEntry, Arc<ModelHandle>);

/// 按请求路径登记的模型，每个路径只加载一次
#[derive(Debug, Default)]
pub struct ModelRegistry {
  models: RwLock<HashMap<String, Slot>>,
}

impl ModelRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entry(&self, path: &str) -> Option<ModelRegistryEntry> {
    let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
    models.get(path).map(|(entry, _)| entry.clone())
  }

  pub fn handle(&self, path: &str) -> Option<Arc<ModelHandle>> {
    let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
    models.get(path).map(|(_, handle)| handle.clone())
  }

  pub fn len(&self) -> usize {
    self.models.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 已登记时直接返回原记录；否则调用 `load` 并登记
  ///
  /// 两个请求同时加载同一路径时，先写入者胜出，另一个结果被丢弃。
  pub fn get_or_load<E>(
    &self,
    path: &str,
    model_type: Backbone,
    load: impl FnOnce() -> Result<Arc<ModelHandle>, E>,
  ) -> Result<ModelRegistryEntry, E> {
    if let Some(entry) = self.entry(path) {
      debug!("模型 {} 已加载，复用登记记录", path);
      return Ok(entry);
    }

    let handle = load()?;
    let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
    let (entry, _) = models.entry(path.to_string()).or_insert_with(|| {
      let entry = ModelRegistryEntry {
        path: path.to_string(),
        model_type,
        loaded_time: Local::now(),
      };
      (entry, handle)
    });
    Ok(entry.clone())
  }
}
