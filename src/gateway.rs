// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/gateway.rs - 请求网关
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
  panic::{AssertUnwindSafe, catch_unwind},
  path::PathBuf,
  sync::Arc,
};

use chrono::{Local, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::GatewayConfig,
  input::{EncodedImage, InputError, list_images},
  model::{Backbone, EngineError, InferenceEngine, InferenceResult, Prediction},
  protocol::{Envelope, Operation, OperationKind, ValidationError},
  telemetry::TelemetryCache,
};

mod registry;
pub mod stubs;

pub use self::registry::{ModelRegistry, ModelRegistryEntry};

#[derive(Error, Debug)]
pub enum GatewayError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Engine(#[from] EngineError),
  #[error("读取图像失败: {0}")]
  Input(#[from] InputError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型未加载: {0}")]
  ModelNotLoaded(String),
  #[error("层 {0} 暂无特征图")]
  FeatureMapUnavailable(String),
}

/// 单个分类器的判定结果
#[derive(Debug, Clone, Serialize)]
struct Verdict {
  detected: bool,
  confidence: f32,
  predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, Serialize)]
struct EnsembleMember {
  model: String,
  confidence: f32,
  detected: bool,
}

/// 把具名操作分派到推理引擎、遥测快照与模型登记表
///
/// 任何路径（包括 panic）都返回 `Envelope`，错误不会越过网关。
pub struct Gateway {
  engine: Arc<InferenceEngine>,
  telemetry: Arc<TelemetryCache>,
  registry: ModelRegistry,
  config: GatewayConfig,
}

impl Gateway {
  pub fn new(engine: Arc<InferenceEngine>, telemetry: Arc<TelemetryCache>, config: GatewayConfig) -> Self {
    Self {
      engine,
      telemetry,
      registry: ModelRegistry::new(),
      config,
    }
  }

  pub fn registry(&self) -> &ModelRegistry {
    &self.registry
  }

  pub fn config(&self) -> &GatewayConfig {
    &self.config
  }

  pub fn handle(&self, kind: OperationKind, params: &Value) -> Envelope {
    match Operation::parse(kind, params) {
      Ok(op) => self.dispatch(op),
      Err(err) => {
        warn!("请求 {} 参数无效: {}", kind, err);
        Envelope::error(err.to_string())
      }
    }
  }

  pub fn dispatch(&self, op: Operation) -> Envelope {
    let kind = op.kind();
    match catch_unwind(AssertUnwindSafe(|| self.execute(op))) {
      Ok(Ok(payload)) => Envelope::success(payload),
      Ok(Err(err)) => {
        warn!("操作 {} 失败: {}", kind, err);
        Envelope::error(err.to_string())
      }
      Err(_) => {
        error!("操作 {} 发生内部错误", kind);
        Envelope::error(format!("操作 {} 发生内部错误", kind))
      }
    }
  }

  fn execute(&self, op: Operation) -> Result<Value, GatewayError> {
    match op {
      Operation::ListStaticImages => {
        let images = list_images(&self.config.static_dir)?;
        Ok(json!({ "data": images }))
      }
      Operation::CheckModel { model_path } => {
        let resolved = self.resolve_model(&model_path);
        Ok(json!({ "exists": resolved.is_file(), "path": resolved }))
      }
      Operation::LoadModel {
        model_path,
        model_type,
      } => {
        let backbone: Backbone = model_type.parse()?;
        let entry = self.registry.get_or_load(&model_path, backbone, || {
          let handle = self.engine.select_backbone(backbone, false)?;
          self.engine.load_weights_file(&handle, self.resolve_model(&model_path))?;
          info!("模型 {} 已加载 ({})", model_path, backbone);
          Ok::<_, GatewayError>(handle)
        })?;
        Ok(json!({ "loaded": true, "model_info": entry }))
      }
      Operation::Classify {
        image_path,
        model_path,
      } => {
        let verdict = self.classify(&image_path, &model_path)?;
        Ok(json!({ "results": verdict }))
      }
      Operation::ClassifyAsync {
        image_path,
        model_path,
      } => {
        let verdict = self.classify(&image_path, &model_path)?;
        let task_id = format!("task_{}", Utc::now().timestamp());
        Ok(json!({ "task_id": task_id, "results": verdict }))
      }
      Operation::Ensemble {
        image_path,
        model_paths,
      } => self.ensemble(&image_path, &model_paths),
      Operation::TrendInfer { .. } => Ok(json!({ "prediction": stubs::trend_prediction() })),
      Operation::TrendCheck { .. } => Ok(json!({ "result": stubs::trend_check() })),
      Operation::FeatureMap {
        model_name,
        layer_name,
      } => {
        let handle = self
          .registry
          .handle(&model_name)
          .ok_or_else(|| GatewayError::ModelNotLoaded(model_name.clone()))?;
        let map = handle
          .feature_map(&layer_name)?
          .ok_or(GatewayError::FeatureMapUnavailable(layer_name))?;
        Ok(json!({ "feature_map": { "shape": map.shape(), "data": map.rows() } }))
      }
      Operation::Pid => Ok(json!({ "pid": std::process::id(), "server_time": server_time() })),
      Operation::Cpu => {
        let snapshot = self.telemetry.latest();
        Ok(json!({
          "cpu_percent": snapshot.cpu_percent,
          "memory": snapshot.memory,
          "server_time": server_time(),
        }))
      }
      Operation::Gpu => {
        let snapshot = self.telemetry.latest();
        Ok(json!({ "gpu_info": snapshot.accelerator, "server_time": server_time() }))
      }
      Operation::Alert => Ok(json!({ "alert": stubs::alert_raised(), "last_check": server_time() })),
      Operation::Signal { payload } => {
        info!("收到信号: {}", payload);
        Ok(json!({ "received": true, "timestamp": server_time() }))
      }
    }
  }

  /// 相对路径在模型目录下解析
  fn resolve_model(&self, model_path: &str) -> PathBuf {
    let path = PathBuf::from(model_path);
    if path.is_absolute() {
      path
    } else {
      self.config.model_dir.join(path)
    }
  }

  fn run_classifier(&self, image: &EncodedImage, model_path: &str) -> Result<InferenceResult, GatewayError> {
    let handle = self
      .registry
      .handle(model_path)
      .ok_or_else(|| GatewayError::ModelNotLoaded(model_path.to_string()))?;
    Ok(self.engine.classify(&handle, &image.bytes)?)
  }

  fn verdict(&self, result: InferenceResult) -> Verdict {
    let confidence = result.top1().map(|p| p.probability).unwrap_or_default();
    Verdict {
      detected: confidence >= self.config.detection_threshold,
      confidence,
      predictions: result.predictions,
    }
  }

  fn classify(&self, image_path: &str, model_path: &str) -> Result<Verdict, GatewayError> {
    let image = EncodedImage::read(image_path)?;
    let result = self.run_classifier(&image, model_path)?;
    Ok(self.verdict(result))
  }

  fn ensemble(&self, image_path: &str, model_paths: &[String]) -> Result<Value, GatewayError> {
    if model_paths.is_empty() {
      return Err(ValidationError::InvalidField("model_paths", "至少需要一个模型".to_string()).into());
    }

    let image = EncodedImage::read(image_path)?;
    let mut detections = Vec::with_capacity(model_paths.len());
    for model_path in model_paths {
      let verdict = self.verdict(self.run_classifier(&image, model_path)?);
      detections.push(EnsembleMember {
        model: model_path.clone(),
        confidence: verdict.confidence,
        detected: verdict.detected,
      });
    }

    let votes = detections.iter().filter(|d| d.detected).count();
    let confidence = detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32;
    Ok(json!({
      "results": {
        "ensemble_result": votes * 2 > detections.len(),
        "confidence": confidence,
        "detections": detections,
      }
    }))
  }
}

fn server_time() -> String {
  Local::now().to_rfc3339()
}
