// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/telemetry.rs - 主机与加速器遥测
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

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod probe;
mod sampler;

pub use self::probe::{NvidiaSmiProbe, SysinfoProbe};
pub use self::sampler::{SamplerHandle, TelemetrySampler};

/// 超过该百分比时记录高负载警告
pub const HIGH_LOAD_PERCENT: f64 = 80.0;

#[derive(Error, Debug)]
pub enum ProbeError {
  #[error("探针不可用: {0}")]
  Unavailable(String),
  #[error("命令执行失败: {0}")]
  Command(#[from] std::io::Error),
  #[error("输出解析失败: {0}")]
  Parse(String),
}

/// 内存统计，单位 GB
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
  pub total: f64,
  pub used: f64,
  pub percent: f64,
}

/// 加速器统计，显存单位 MB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorStats {
  pub gpu_percent: f64,
  pub memory_used: f64,
  pub memory_reserved: f64,
  pub device_name: String,
}

impl AcceleratorStats {
  /// 查询失败时发布的全零记录
  pub fn zeroed() -> Self {
    Self {
      gpu_percent: 0.0,
      memory_used: 0.0,
      memory_reserved: 0.0,
      device_name: "N/A".to_string(),
    }
  }
}

impl Default for AcceleratorStats {
  fn default() -> Self {
    Self::zeroed()
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostStats {
  pub cpu_percent: f64,
  pub memory: MemoryStats,
}

/// 某一时刻的遥测记录，发布后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
  pub cpu_percent: f64,
  pub memory: MemoryStats,
  pub accelerator: AcceleratorStats,
  pub timestamp: DateTime<Utc>,
}

impl TelemetrySnapshot {
  pub fn new(host: HostStats, accelerator: AcceleratorStats) -> Self {
    Self {
      cpu_percent: host.cpu_percent,
      memory: host.memory,
      accelerator,
      timestamp: Utc::now(),
    }
  }

  pub fn is_high_load(&self) -> bool {
    self.cpu_percent > HIGH_LOAD_PERCENT || self.accelerator.gpu_percent > HIGH_LOAD_PERCENT
  }
}

impl Default for TelemetrySnapshot {
  fn default() -> Self {
    Self::new(HostStats::default(), AcceleratorStats::zeroed())
  }
}

pub trait HostProbe: Send {
  fn sample(&mut self) -> Result<HostStats, ProbeError>;
}

pub trait AcceleratorProbe: Send {
  fn query(&mut self) -> Result<AcceleratorStats, ProbeError>;
}

/// 全进程共享的最新快照
///
/// 发布时整体替换 `Arc`，读者只拿到完整的旧记录或完整的新记录。
#[derive(Debug, Default)]
pub struct TelemetryCache {
  current: RwLock<Arc<TelemetrySnapshot>>,
}

impl TelemetryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn latest(&self) -> Arc<TelemetrySnapshot> {
    self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// 替换快照；时间戳早于当前快照时抬升到当前值，保证单调不减
  pub fn publish(&self, mut snapshot: TelemetrySnapshot) -> Arc<TelemetrySnapshot> {
    let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
    if snapshot.timestamp < current.timestamp {
      snapshot.timestamp = current.timestamp;
    }
    let snapshot = Arc::new(snapshot);
    *current = snapshot.clone();
    snapshot
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn snapshot(cpu: f64, name: &str) -> TelemetrySnapshot {
    TelemetrySnapshot::new(
      HostStats {
        cpu_percent: cpu,
        memory: MemoryStats {
          total: cpu,
          used: cpu,
          percent: cpu,
        },
      },
      AcceleratorStats {
        gpu_percent: cpu,
        memory_used: cpu,
        memory_reserved: cpu,
        device_name: name.to_string(),
      },
    )
  }

  #[test]
  fn timestamps_never_go_backwards() {
    let cache = TelemetryCache::new();
    let first = cache.publish(snapshot(1.0, "a"));

    let mut stale = snapshot(2.0, "b");
    stale.timestamp = first.timestamp - Duration::seconds(10);
    let second = cache.publish(stale);

    assert_eq!(second.timestamp, first.timestamp);
    assert_eq!(cache.latest().cpu_percent, 2.0);
  }

  #[test]
  fn readers_see_whole_snapshots() {
    let cache = Arc::new(TelemetryCache::new());
    cache.publish(snapshot(0.0, "0"));

    std::thread::scope(|s| {
      let writer = cache.clone();
      s.spawn(move || {
        for i in 1..2000 {
          writer.publish(snapshot(i as f64, &i.to_string()));
        }
      });
      for _ in 0..4 {
        let reader = cache.clone();
        s.spawn(move || {
          for _ in 0..2000 {
            let seen = reader.latest();
            let v = seen.cpu_percent;
            assert_eq!(seen.memory.total, v);
            assert_eq!(seen.memory.percent, v);
            assert_eq!(seen.accelerator.gpu_percent, v);
            assert_eq!(seen.accelerator.device_name, (v as u32).to_string());
          }
        });
      }
    });
  }

  #[test]
  fn high_load_threshold() {
    assert!(!snapshot(80.0, "x").is_high_load());
    assert!(snapshot(80.5, "x").is_high_load());
  }
}
