// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/config.rs - 运行配置
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

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::model::TOP_K;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_STATIC_DIR: &str = "data/images";
const DEFAULT_NUM_CLASSES: usize = 1000;
const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;
const DEFAULT_SAMPLER_PERIOD: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("重试次数必须至少为 1, 实际为 {0}")]
  InvalidMaxAttempts(u32),
  #[error("类别数量 {num_classes} 少于每次返回的候选数 {minimum}")]
  TooFewClasses { num_classes: usize, minimum: usize },
}

/// 推理引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// 预训练权重目录，按 `<variant>.safetensors` 查找
  pub weights_dir: Option<PathBuf>,
  /// 分类类别数量
  pub num_classes: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      weights_dir: None,
      num_classes: DEFAULT_NUM_CLASSES,
    }
  }
}

impl EngineConfig {
  pub fn new(weights_dir: Option<PathBuf>, num_classes: usize) -> Result<Self, ConfigError> {
    let config = Self {
      weights_dir,
      num_classes,
    };
    config.validate()?;
    Ok(config)
  }

  /// 类别数必须足够返回 `TOP_K` 个候选
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.num_classes < TOP_K {
      return Err(ConfigError::TooFewClasses {
        num_classes: self.num_classes,
        minimum: TOP_K,
      });
    }
    Ok(())
  }
}

/// 请求网关配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
  /// 模型文件目录，相对路径在此目录下解析
  pub model_dir: PathBuf,
  /// 静态图像目录
  pub static_dir: PathBuf,
  /// top-1 概率不低于该阈值即视为检出
  pub detection_threshold: f32,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
      static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
      detection_threshold: DEFAULT_DETECTION_THRESHOLD,
    }
  }
}

/// 遥测采样配置
#[derive(Debug, Clone)]
pub struct SamplerConfig {
  pub period: Duration,
}

impl Default for SamplerConfig {
  fn default() -> Self {
    Self {
      period: DEFAULT_SAMPLER_PERIOD,
    }
  }
}

/// HTTP 服务配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
    }
  }
}

impl ServerConfig {
  pub fn addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

/// 客户端重试策略
///
/// 最坏情况下一次调用耗时 `max_attempts × (timeout + delay)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  max_attempts: u32,
  timeout: Duration,
  delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      timeout: DEFAULT_ATTEMPT_TIMEOUT,
      delay: DEFAULT_RETRY_DELAY,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, timeout: Duration, delay: Duration) -> Result<Self, ConfigError> {
    if max_attempts == 0 {
      return Err(ConfigError::InvalidMaxAttempts(max_attempts));
    }
    Ok(Self {
      max_attempts,
      timeout,
      delay,
    })
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  pub fn worst_case(&self) -> Duration {
    (self.timeout + self.delay) * self.max_attempts
  }
}
