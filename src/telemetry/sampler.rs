// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/telemetry/sampler.rs - 周期遥测采样
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
  sync::{
    Arc,
    mpsc::{self, RecvTimeoutError},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, error, info, warn};

use super::{
  AcceleratorProbe, AcceleratorStats, HostProbe, NvidiaSmiProbe, SysinfoProbe, TelemetryCache,
  TelemetrySnapshot,
};
use crate::config::SamplerConfig;

/// 遥测快照的唯一写者
pub struct TelemetrySampler {
  cache: Arc<TelemetryCache>,
  host: Box<dyn HostProbe>,
  accelerator: Box<dyn AcceleratorProbe>,
  period: Duration,
}

impl TelemetrySampler {
  pub fn new(cache: Arc<TelemetryCache>, config: &SamplerConfig) -> Self {
    Self::with_probes(
      cache,
      Box::new(SysinfoProbe::default()),
      Box::new(NvidiaSmiProbe::default().with_timeout(config.period)),
      config.period,
    )
  }

  pub fn with_probes(
    cache: Arc<TelemetryCache>,
    host: Box<dyn HostProbe>,
    accelerator: Box<dyn AcceleratorProbe>,
    period: Duration,
  ) -> Self {
    Self {
      cache,
      host,
      accelerator,
      period,
    }
  }

  /// 采样一次并发布；主机采样失败时跳过本轮
  pub fn sample_once(&mut self) -> Option<Arc<TelemetrySnapshot>> {
    let host = match self.host.sample() {
      Ok(host) => host,
      Err(err) => {
        warn!("主机指标采样失败: {}", err);
        return None;
      }
    };

    let accelerator = self.accelerator.query().unwrap_or_else(|err| {
      warn!("GPU 信息查询失败，使用零值: {}", err);
      AcceleratorStats::zeroed()
    });

    let snapshot = self.cache.publish(TelemetrySnapshot::new(host, accelerator));
    if snapshot.is_high_load() {
      warn!(
        "系统负载过高: CPU {:.1}%, GPU {:.1}%",
        snapshot.cpu_percent, snapshot.accelerator.gpu_percent
      );
    }
    Some(snapshot)
  }

  /// 在独立线程上按固定周期采样，直到 `SamplerHandle::stop`
  pub fn spawn(mut self) -> std::io::Result<SamplerHandle> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let period = self.period;

    let thread = thread::Builder::new()
      .name("telemetry-sampler".to_string())
      .spawn(move || {
        info!("遥测采样线程启动，周期 {:?}", period);
        loop {
          match catch_unwind(AssertUnwindSafe(|| self.sample_once())) {
            Ok(Some(snapshot)) => debug!("遥测已更新: {}", snapshot.timestamp),
            Ok(None) => {}
            Err(_) => error!("遥测采样发生 panic，继续下一轮"),
          }

          match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
          }
        }
        info!("遥测采样线程退出");
      })?;

    Ok(SamplerHandle {
      stop_tx,
      thread,
    })
  }
}

pub struct SamplerHandle {
  stop_tx: mpsc::Sender<()>,
  thread: JoinHandle<()>,
}

impl SamplerHandle {
  pub fn stop(self) {
    let _ = self.stop_tx.send(());
    if self.thread.join().is_err() {
      error!("遥测采样线程异常退出");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::telemetry::{HostStats, MemoryStats, ProbeError};
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FixedHost(f64);

  impl HostProbe for FixedHost {
    fn sample(&mut self) -> Result<HostStats, ProbeError> {
      Ok(HostStats {
        cpu_percent: self.0,
        memory: MemoryStats {
          total: 16.0,
          used: 4.0,
          percent: 25.0,
        },
      })
    }
  }

  /// 第一次采样 panic，之后正常
  struct PanicOnceHost(Arc<AtomicUsize>);

  impl HostProbe for PanicOnceHost {
    fn sample(&mut self) -> Result<HostStats, ProbeError> {
      if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
        panic!("probe exploded");
      }
      FixedHost(10.0).sample()
    }
  }

  struct NoGpu;

  impl AcceleratorProbe for NoGpu {
    fn query(&mut self) -> Result<AcceleratorStats, ProbeError> {
      Err(ProbeError::Unavailable("no device".to_string()))
    }
  }

  struct FakeGpu;

  impl AcceleratorProbe for FakeGpu {
    fn query(&mut self) -> Result<AcceleratorStats, ProbeError> {
      Ok(AcceleratorStats {
        gpu_percent: 95.0,
        memory_used: 512.0,
        memory_reserved: 1024.0,
        device_name: "fake".to_string(),
      })
    }
  }

  #[test]
  fn accelerator_failure_publishes_zeroed_record() {
    let cache = Arc::new(TelemetryCache::new());
    let mut sampler =
      TelemetrySampler::with_probes(cache.clone(), Box::new(FixedHost(42.0)), Box::new(NoGpu), Duration::from_secs(1));

    let snapshot = sampler.sample_once().unwrap();
    assert_eq!(snapshot.cpu_percent, 42.0);
    assert_eq!(snapshot.accelerator, AcceleratorStats::zeroed());
    assert_eq!(*cache.latest(), *snapshot);
  }

  #[test]
  fn loop_survives_panicking_cycle() {
    let cache = Arc::new(TelemetryCache::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let sampler = TelemetrySampler::with_probes(
      cache.clone(),
      Box::new(PanicOnceHost(calls.clone())),
      Box::new(FakeGpu),
      Duration::from_millis(20),
    );

    let handle = sampler.spawn().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while calls.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
      thread::sleep(Duration::from_millis(10));
    }
    handle.stop();

    assert!(calls.load(Ordering::SeqCst) >= 3);
    let latest = cache.latest();
    assert_eq!(latest.cpu_percent, 10.0);
    assert_eq!(latest.accelerator.device_name, "fake");
  }

  #[test]
  fn published_timestamps_are_monotonic() {
    let cache = Arc::new(TelemetryCache::new());
    let mut sampler =
      TelemetrySampler::with_probes(cache, Box::new(FixedHost(1.0)), Box::new(FakeGpu), Duration::from_secs(1));

    let mut last = sampler.sample_once().unwrap().timestamp;
    for _ in 0..20 {
      let next = sampler.sample_once().unwrap().timestamp;
      assert!(next >= last);
      last = next;
    }
  }
}
