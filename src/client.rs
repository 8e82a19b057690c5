// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/client.rs - 带重试的远程调用客户端
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

use std::{fmt, sync::Arc, thread, time::Duration};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
  config::RetryPolicy,
  protocol::{Envelope, Operation},
};

#[cfg(feature = "client")]
mod http;
#[cfg(feature = "client")]
pub use self::http::HttpTransport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("请求超时: {0}")]
  Timeout(String),
  #[error("连接被拒绝: {0}")]
  ConnectionRefused(String),
  #[error("传输错误: {0}")]
  Other(String),
  #[error("响应无法解析: {0}")]
  Malformed(String),
}

/// 重试耗尽后写入错误 Envelope 的 `reason` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
  Timeout,
  ConnectionRefused,
  TransportError,
  Unknown,
}

impl FailureReason {
  pub const FIELD: &'static str = "reason";

  pub fn as_str(&self) -> &'static str {
    match self {
      FailureReason::Timeout => "Timeout",
      FailureReason::ConnectionRefused => "ConnectionRefused",
      FailureReason::TransportError => "TransportError",
      FailureReason::Unknown => "Unknown",
    }
  }

  /// 读取错误 Envelope 中的原因；服务端返回的业务错误没有该字段
  pub fn of(envelope: &Envelope) -> Option<Self> {
    match envelope.get(Self::FIELD)?.as_str()? {
      "Timeout" => Some(FailureReason::Timeout),
      "ConnectionRefused" => Some(FailureReason::ConnectionRefused),
      "TransportError" => Some(FailureReason::TransportError),
      _ => Some(FailureReason::Unknown),
    }
  }
}

impl From<&TransportError> for FailureReason {
  fn from(err: &TransportError) -> Self {
    match err {
      TransportError::Timeout(_) => FailureReason::Timeout,
      TransportError::ConnectionRefused(_) => FailureReason::ConnectionRefused,
      TransportError::Other(_) => FailureReason::TransportError,
      TransportError::Malformed(_) => FailureReason::Unknown,
    }
  }
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 单次请求的传输层，每次调用受 `timeout` 约束
pub trait Transport {
  fn send(&self, op: &Operation, timeout: Duration) -> Result<Envelope, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
  fn send(&self, op: &Operation, timeout: Duration) -> Result<Envelope, TransportError> {
    (**self).send(op, timeout)
  }
}

/// 按重试策略调用远程操作，永不向调用者抛错
///
/// 进行中的一次尝试无法被中途取消；调用者可以放弃等待，但该尝试会运行到超时为止。
pub struct ResilientClient<T> {
  transport: T,
  policy: RetryPolicy,
}

impl<T: Transport> ResilientClient<T> {
  pub fn new(transport: T, policy: RetryPolicy) -> Self {
    Self { transport, policy }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  pub fn call(&self, op: Operation) -> Envelope {
    let kind = op.kind();
    let max_attempts = self.policy.max_attempts();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
      match self.transport.send(&op, self.policy.timeout()) {
        Ok(envelope) => {
          debug!("请求 {} 第 {} 次尝试完成", kind, attempt);
          return envelope;
        }
        Err(err) => {
          warn!("请求 {} 失败 ({}/{}): {}", kind, attempt, max_attempts, err);
          last_error = Some(err);
          if attempt < max_attempts {
            thread::sleep(self.policy.delay());
          }
        }
      }
    }

    let (reason, detail) = match &last_error {
      Some(err) => (FailureReason::from(err), err.to_string()),
      None => (FailureReason::Unknown, "未发出请求".to_string()),
    };
    error!("请求 {} 在 {} 次尝试后失败: {}", kind, max_attempts, detail);
    Envelope::error(format!("请求 {} 在 {} 次尝试后失败: {}", kind, max_attempts, detail))
      .with_field(FailureReason::FIELD, reason.as_str())
  }

  pub fn get_static_data(&self) -> Envelope {
    self.call(Operation::ListStaticImages)
  }

  pub fn check_model(&self, model_path: &str) -> Envelope {
    self.call(Operation::CheckModel {
      model_path: model_path.to_string(),
    })
  }

  /// 服务端按路径幂等加载，可安全重试
  pub fn load_model(&self, model_path: &str, model_type: &str) -> Envelope {
    self.call(Operation::LoadModel {
      model_path: model_path.to_string(),
      model_type: model_type.to_string(),
    })
  }

  pub fn inference(&self, image_path: &str, model_path: &str) -> Envelope {
    self.call(Operation::Classify {
      image_path: image_path.to_string(),
      model_path: model_path.to_string(),
    })
  }

  pub fn inference_async(&self, image_path: &str, model_path: &str) -> Envelope {
    self.call(Operation::ClassifyAsync {
      image_path: image_path.to_string(),
      model_path: model_path.to_string(),
    })
  }

  pub fn detection(&self, image_path: &str, model_paths: &[String]) -> Envelope {
    self.call(Operation::Ensemble {
      image_path: image_path.to_string(),
      model_paths: model_paths.to_vec(),
    })
  }

  pub fn trend_inference(&self, data: Value) -> Envelope {
    self.call(Operation::TrendInfer { data })
  }

  pub fn check_trend(&self, image_series: Vec<Value>) -> Envelope {
    self.call(Operation::TrendCheck { image_series })
  }

  pub fn get_feature_map(&self, model_name: &str, layer_name: &str) -> Envelope {
    self.call(Operation::FeatureMap {
      model_name: model_name.to_string(),
      layer_name: layer_name.to_string(),
    })
  }

  pub fn get_pid(&self) -> Envelope {
    self.call(Operation::Pid)
  }

  pub fn get_cpu_usage(&self) -> Envelope {
    self.call(Operation::Cpu)
  }

  pub fn get_gpu_usage(&self) -> Envelope {
    self.call(Operation::Gpu)
  }

  pub fn check_alert(&self) -> Envelope {
    self.call(Operation::Alert)
  }

  pub fn send_signal(&self, payload: Value) -> Envelope {
    self.call(Operation::Signal { payload })
  }
}
