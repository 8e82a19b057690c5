// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/telemetry/probe.rs - 主机与加速器探针
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
  process::{Command, Stdio},
  thread,
  time::{Duration, Instant},
};

use sysinfo::System;

use super::{AcceleratorProbe, AcceleratorStats, HostProbe, HostStats, MemoryStats, ProbeError};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 基于 sysinfo 的 CPU 与内存采样
///
/// CPU 占用率按两次刷新之间的差值计算，首次采样可能为 0。
pub struct SysinfoProbe {
  system: System,
}

impl Default for SysinfoProbe {
  fn default() -> Self {
    let mut system = System::new();
    system.refresh_cpu();
    Self { system }
  }
}

impl HostProbe for SysinfoProbe {
  fn sample(&mut self) -> Result<HostStats, ProbeError> {
    self.system.refresh_cpu();
    self.system.refresh_memory();

    let total = self.system.total_memory() as f64;
    let used = self.system.used_memory() as f64;
    let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };

    Ok(HostStats {
      cpu_percent: self.system.global_cpu_info().cpu_usage() as f64,
      memory: MemoryStats {
        total: total / BYTES_PER_GB,
        used: used / BYTES_PER_GB,
        percent,
      },
    })
  }
}

/// 通过 `nvidia-smi` 查询第一块 GPU
///
/// 子进程超过 `timeout` 仍未退出时被终止，本次查询视为不可用。
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
  program: String,
  timeout: Duration,
}

impl Default for NvidiaSmiProbe {
  fn default() -> Self {
    Self::with_program("nvidia-smi")
  }
}

impl NvidiaSmiProbe {
  pub fn with_program(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      timeout: DEFAULT_QUERY_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }
}

impl AcceleratorProbe for NvidiaSmiProbe {
  fn query(&mut self) -> Result<AcceleratorStats, ProbeError> {
    let mut child = Command::new(&self.program)
      .args([
        "--query-gpu=utilization.gpu,memory.used,memory.reserved,name",
        "--format=csv,noheader,nounits",
      ])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    let deadline = Instant::now() + self.timeout;
    while child.try_wait()?.is_none() {
      if Instant::now() >= deadline {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ProbeError::Unavailable(format!(
          "{} 在 {:?} 内未响应",
          self.program, self.timeout
        )));
      }
      thread::sleep(POLL_INTERVAL);
    }
    let output = child.wait_with_output()?;

    if !output.status.success() {
      return Err(ProbeError::Unavailable(
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
      ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_nvidia_smi(&stdout)
  }
}

/// 解析第一行 `utilization, used, reserved, name`
fn parse_nvidia_smi(stdout: &str) -> Result<AcceleratorStats, ProbeError> {
  let line = stdout
    .lines()
    .map(str::trim)
    .find(|line| !line.is_empty())
    .ok_or_else(|| ProbeError::Unavailable("未检测到 GPU".to_string()))?;

  let parts: Vec<&str> = line.splitn(4, ',').map(str::trim).collect();
  if parts.len() < 4 {
    return Err(ProbeError::Parse(line.to_string()));
  }

  let number = |s: &str| {
    s.parse::<f64>()
      .map_err(|err| ProbeError::Parse(format!("{}: {}", s, err)))
  };

  Ok(AcceleratorStats {
    gpu_percent: number(parts[0])?,
    memory_used: number(parts[1])?,
    memory_reserved: number(parts[2])?,
    device_name: parts[3].to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_first_gpu_line() {
    let stats = parse_nvidia_smi("37, 2048, 4096, NVIDIA GeForce RTX 3060\n12, 1, 2, Other\n").unwrap();
    assert_eq!(stats.gpu_percent, 37.0);
    assert_eq!(stats.memory_used, 2048.0);
    assert_eq!(stats.memory_reserved, 4096.0);
    assert_eq!(stats.device_name, "NVIDIA GeForce RTX 3060");
  }

  #[test]
  fn rejects_malformed_output() {
    assert!(matches!(parse_nvidia_smi(""), Err(ProbeError::Unavailable(_))));
    assert!(matches!(parse_nvidia_smi("37, 2048"), Err(ProbeError::Parse(_))));
    assert!(matches!(parse_nvidia_smi("[N/A], 1, 2, gpu"), Err(ProbeError::Parse(_))));
  }

  #[test]
  fn missing_program_is_command_error() {
    let mut probe = NvidiaSmiProbe::with_program("/nonexistent/shaowei-nvidia-smi");
    assert!(matches!(probe.query(), Err(ProbeError::Command(_))));
  }

  #[cfg(unix)]
  #[test]
  fn hung_query_is_killed_at_timeout() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("nvidia-smi");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut probe = NvidiaSmiProbe::with_program(script.to_string_lossy()).with_timeout(Duration::from_millis(200));
    let start = Instant::now();
    let result = probe.query();

    assert!(matches!(result, Err(ProbeError::Unavailable(_))), "{:?}", result);
    assert!(start.elapsed() < Duration::from_secs(5));
  }

  #[test]
  fn host_probe_reports_memory() {
    let mut probe = SysinfoProbe::default();
    let stats = probe.sample().unwrap();
    assert!(stats.memory.total > 0.0);
    assert!((0.0..=100.0).contains(&stats.memory.percent));
  }
}
