// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/protocol/operation.rs - 具名远程操作
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

use std::fmt;

use serde_json::{Value, json};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("缺少必填字段: {0}")]
  MissingField(&'static str),
  #[error("字段 {0} 无效: {1}")]
  InvalidField(&'static str, String),
  #[error("未知操作: {0}")]
  UnknownOperation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

/// 服务端暴露的固定操作集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  ListStaticImages,
  CheckModel,
  LoadModel,
  Classify,
  ClassifyAsync,
  Ensemble,
  TrendInfer,
  TrendCheck,
  FeatureMap,
  Pid,
  Cpu,
  Gpu,
  Alert,
  Signal,
}

impl OperationKind {
  pub const ALL: [OperationKind; 14] = [
    OperationKind::ListStaticImages,
    OperationKind::CheckModel,
    OperationKind::LoadModel,
    OperationKind::Classify,
    OperationKind::ClassifyAsync,
    OperationKind::Ensemble,
    OperationKind::TrendInfer,
    OperationKind::TrendCheck,
    OperationKind::FeatureMap,
    OperationKind::Pid,
    OperationKind::Cpu,
    OperationKind::Gpu,
    OperationKind::Alert,
    OperationKind::Signal,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      OperationKind::ListStaticImages => "list-static-images",
      OperationKind::CheckModel => "check-model",
      OperationKind::LoadModel => "load-model",
      OperationKind::Classify => "classify",
      OperationKind::ClassifyAsync => "classify-async",
      OperationKind::Ensemble => "ensemble",
      OperationKind::TrendInfer => "trend-infer",
      OperationKind::TrendCheck => "trend-check",
      OperationKind::FeatureMap => "feature-map",
      OperationKind::Pid => "pid",
      OperationKind::Cpu => "cpu",
      OperationKind::Gpu => "gpu",
      OperationKind::Alert => "alert",
      OperationKind::Signal => "signal",
    }
  }

  pub fn path(&self) -> &'static str {
    match self {
      OperationKind::ListStaticImages => "/api/data/get_static_data",
      OperationKind::CheckModel => "/api/model/check",
      OperationKind::LoadModel => "/api/data/load_model",
      OperationKind::Classify => "/api/detection/inference",
      OperationKind::ClassifyAsync => "/api/detection/inference_async",
      OperationKind::Ensemble => "/api/detection/detection",
      OperationKind::TrendInfer => "/api/stp/inference",
      OperationKind::TrendCheck => "/api/stp/trend",
      OperationKind::FeatureMap => "/api/monitor/feature_map",
      OperationKind::Pid => "/api/monitor/pid",
      OperationKind::Cpu => "/api/monitor/cpu",
      OperationKind::Gpu => "/api/monitor/gpu",
      OperationKind::Alert => "/api/monitor/alert",
      OperationKind::Signal => "/api/signal/send",
    }
  }

  pub fn method(&self) -> Method {
    match self {
      OperationKind::ListStaticImages
      | OperationKind::FeatureMap
      | OperationKind::Pid
      | OperationKind::Cpu
      | OperationKind::Gpu
      | OperationKind::Alert => Method::Get,
      _ => Method::Post,
    }
  }

  pub fn from_name(name: &str) -> Result<Self, ValidationError> {
    Self::ALL
      .into_iter()
      .find(|kind| kind.name() == name)
      .ok_or_else(|| ValidationError::UnknownOperation(name.to_string()))
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// 带参数的操作请求
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  ListStaticImages,
  CheckModel {
    model_path: String,
  },
  LoadModel {
    model_path: String,
    model_type: String,
  },
  Classify {
    image_path: String,
    model_path: String,
  },
  ClassifyAsync {
    image_path: String,
    model_path: String,
  },
  Ensemble {
    image_path: String,
    model_paths: Vec<String>,
  },
  TrendInfer {
    data: Value,
  },
  TrendCheck {
    image_series: Vec<Value>,
  },
  FeatureMap {
    model_name: String,
    layer_name: String,
  },
  Pid,
  Cpu,
  Gpu,
  Alert,
  Signal {
    payload: Value,
  },
}

fn required_str(params: &Value, field: &'static str) -> Result<String, ValidationError> {
  match params.get(field) {
    None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
    Some(Value::String(s)) if s.is_empty() => Err(ValidationError::MissingField(field)),
    Some(Value::String(s)) => Ok(s.clone()),
    Some(other) => Err(ValidationError::InvalidField(field, format!("需要字符串, 实际为 {}", other))),
  }
}

fn required_array<'a>(params: &'a Value, field: &'static str) -> Result<&'a Vec<Value>, ValidationError> {
  match params.get(field) {
    None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
    Some(Value::Array(items)) => Ok(items),
    Some(other) => Err(ValidationError::InvalidField(field, format!("需要数组, 实际为 {}", other))),
  }
}

impl Operation {
  pub fn kind(&self) -> OperationKind {
    match self {
      Operation::ListStaticImages => OperationKind::ListStaticImages,
      Operation::CheckModel { .. } => OperationKind::CheckModel,
      Operation::LoadModel { .. } => OperationKind::LoadModel,
      Operation::Classify { .. } => OperationKind::Classify,
      Operation::ClassifyAsync { .. } => OperationKind::ClassifyAsync,
      Operation::Ensemble { .. } => OperationKind::Ensemble,
      Operation::TrendInfer { .. } => OperationKind::TrendInfer,
      Operation::TrendCheck { .. } => OperationKind::TrendCheck,
      Operation::FeatureMap { .. } => OperationKind::FeatureMap,
      Operation::Pid => OperationKind::Pid,
      Operation::Cpu => OperationKind::Cpu,
      Operation::Gpu => OperationKind::Gpu,
      Operation::Alert => OperationKind::Alert,
      Operation::Signal { .. } => OperationKind::Signal,
    }
  }

  /// 从请求参数（GET 查询串或 POST 请求体）构造操作
  pub fn parse(kind: OperationKind, params: &Value) -> Result<Self, ValidationError> {
    let op = match kind {
      OperationKind::ListStaticImages => Operation::ListStaticImages,
      OperationKind::CheckModel => Operation::CheckModel {
        model_path: required_str(params, "model_path")?,
      },
      OperationKind::LoadModel => Operation::LoadModel {
        model_path: required_str(params, "model_path")?,
        model_type: required_str(params, "model_type")?,
      },
      OperationKind::Classify => Operation::Classify {
        image_path: required_str(params, "image_path")?,
        model_path: required_str(params, "model_path")?,
      },
      OperationKind::ClassifyAsync => Operation::ClassifyAsync {
        image_path: required_str(params, "image_path")?,
        model_path: required_str(params, "model_path")?,
      },
      OperationKind::Ensemble => {
        let image_path = required_str(params, "image_path")?;
        let items = required_array(params, "model_paths")?;
        if items.is_empty() {
          return Err(ValidationError::InvalidField("model_paths", "至少需要一个模型".to_string()));
        }
        let model_paths = items
          .iter()
          .map(|item| {
            item
              .as_str()
              .map(str::to_string)
              .ok_or_else(|| ValidationError::InvalidField("model_paths", format!("需要字符串, 实际为 {}", item)))
          })
          .collect::<Result<Vec<_>, _>>()?;
        Operation::Ensemble {
          image_path,
          model_paths,
        }
      }
      OperationKind::TrendInfer => Operation::TrendInfer {
        data: params.get("data").cloned().ok_or(ValidationError::MissingField("data"))?,
      },
      OperationKind::TrendCheck => Operation::TrendCheck {
        image_series: required_array(params, "image_series")?.clone(),
      },
      OperationKind::FeatureMap => Operation::FeatureMap {
        model_name: required_str(params, "model_name")?,
        layer_name: required_str(params, "layer_name")?,
      },
      OperationKind::Pid => Operation::Pid,
      OperationKind::Cpu => Operation::Cpu,
      OperationKind::Gpu => Operation::Gpu,
      OperationKind::Alert => Operation::Alert,
      OperationKind::Signal => Operation::Signal {
        payload: params.clone(),
      },
    };
    Ok(op)
  }

  /// `parse` 的逆过程，客户端据此组装请求
  pub fn params(&self) -> Value {
    match self {
      Operation::ListStaticImages
      | Operation::Pid
      | Operation::Cpu
      | Operation::Gpu
      | Operation::Alert => json!({}),
      Operation::CheckModel { model_path } => json!({ "model_path": model_path }),
      Operation::LoadModel {
        model_path,
        model_type,
      } => json!({ "model_path": model_path, "model_type": model_type }),
      Operation::Classify {
        image_path,
        model_path,
      }
      | Operation::ClassifyAsync {
        image_path,
        model_path,
      } => json!({ "image_path": image_path, "model_path": model_path }),
      Operation::Ensemble {
        image_path,
        model_paths,
      } => json!({ "image_path": image_path, "model_paths": model_paths }),
      Operation::TrendInfer { data } => json!({ "data": data }),
      Operation::TrendCheck { image_series } => json!({ "image_series": image_series }),
      Operation::FeatureMap {
        model_name,
        layer_name,
      } => json!({ "model_name": model_name, "layer_name": layer_name }),
      Operation::Signal { payload } => payload.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_kind_has_unique_route() {
    let mut paths: Vec<_> = OperationKind::ALL.iter().map(|k| k.path()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), OperationKind::ALL.len());

    for kind in OperationKind::ALL {
      assert_eq!(OperationKind::from_name(kind.name()).unwrap(), kind);
    }
    assert!(matches!(
      OperationKind::from_name("rtsp-stream"),
      Err(ValidationError::UnknownOperation(_))
    ));
  }

  #[test]
  fn params_parse_back_to_operation() {
    let ops = [
      Operation::LoadModel {
        model_path: "resnet18.safetensors".to_string(),
        model_type: "resnet18".to_string(),
      },
      Operation::Ensemble {
        image_path: "a.png".to_string(),
        model_paths: vec!["m1".to_string(), "m2".to_string()],
      },
      Operation::FeatureMap {
        model_name: "m1".to_string(),
        layer_name: "layer3".to_string(),
      },
      Operation::Signal {
        payload: json!({"kind": "stop"}),
      },
      Operation::Gpu,
    ];
    for op in ops {
      assert_eq!(Operation::parse(op.kind(), &op.params()).unwrap(), op);
    }
  }

  #[test]
  fn missing_fields_are_reported() {
    let err = Operation::parse(OperationKind::Classify, &json!({"image_path": "a.png"})).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("model_path"));

    let err = Operation::parse(OperationKind::CheckModel, &json!({"model_path": ""})).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("model_path"));

    let err = Operation::parse(OperationKind::CheckModel, &Value::Null).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("model_path"));
  }

  #[test]
  fn empty_ensemble_is_invalid() {
    let err = Operation::parse(
      OperationKind::Ensemble,
      &json!({"image_path": "a.png", "model_paths": []}),
    )
    .unwrap_err();
    assert!(matches!(err, ValidationError::InvalidField("model_paths", _)));

    let err = Operation::parse(
      OperationKind::Ensemble,
      &json!({"image_path": "a.png", "model_paths": "m1"}),
    )
    .unwrap_err();
    assert!(matches!(err, ValidationError::InvalidField("model_paths", _)));
  }
}
