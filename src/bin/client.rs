// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/bin/client.rs - 检视客户端
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

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use shaowei::{
  FromUrl,
  client::{HttpTransport, ResilientClient},
  config::RetryPolicy,
  protocol::Envelope,
  startup::{StartupEvent, StartupSequencer, StartupState},
};

/// Shaowei 客户端参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 服务地址
  #[arg(long, default_value = "http://127.0.0.1:5000", value_name = "URL")]
  pub server: Url,
  /// 每个请求的最大尝试次数
  #[arg(long, default_value_t = 3, value_name = "COUNT")]
  pub max_attempts: u32,
  /// 单次尝试超时（秒）
  #[arg(long, default_value_t = 3, value_name = "SECS")]
  pub timeout: u64,
  /// 重试间隔（秒）
  #[arg(long, default_value_t = 1, value_name = "SECS")]
  pub delay: u64,
  /// 启动检查失败后自动重启的次数
  #[arg(long, default_value_t = 0, value_name = "COUNT")]
  pub restarts: u32,

  #[command(subcommand)]
  pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 列出静态图像
  Images,
  /// 检查模型文件是否存在
  Check { model_path: String },
  /// 加载模型
  Load { model_path: String, model_type: String },
  /// 单模型推理
  Infer {
    image_path: String,
    model_path: String,
    /// 使用异步接口
    #[arg(long = "async")]
    background: bool,
  },
  /// 多模型投票
  Detect {
    image_path: String,
    #[arg(required = true)]
    model_paths: Vec<String>,
  },
  /// 获取特征图
  FeatureMap { model_name: String, layer_name: String },
  /// 查询服务进程号
  Pid,
  /// 查询 CPU 与内存
  Cpu,
  /// 查询 GPU
  Gpu,
  /// 查询告警
  Alert,
  /// 趋势预测
  Trend { data: String },
  /// 趋势检查，参数为图像序列的 JSON 数组
  TrendCheck { image_series: String },
  /// 发送信号，参数为 JSON
  Signal { payload: String },
}

fn print(envelope: &Envelope) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(envelope)?);
  if !envelope.is_success() {
    warn!("请求失败: {}", envelope.message().unwrap_or("未知错误"));
  }
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("服务地址: {}", args.server);

  let policy = RetryPolicy::new(
    args.max_attempts,
    Duration::from_secs(args.timeout),
    Duration::from_secs(args.delay),
  )?;
  let transport = HttpTransport::from_url(&args.server)?;
  let client = Arc::new(ResilientClient::new(transport, policy));

  let sequencer = StartupSequencer::new(client.clone());
  let mut run = sequencer.start()?;
  let mut restarts = args.restarts;
  loop {
    while let Some(event) = run.next_event() {
      match event {
        StartupEvent::Progress(percent) => info!("启动进度: {}%", percent),
        StartupEvent::Succeeded => info!("启动检查完成"),
        StartupEvent::Failed(failure) => warn!("启动检查失败: {}", failure),
      }
    }
    let failure = match run.state() {
      StartupState::Failed(failure) => failure.clone(),
      _ => break,
    };
    if restarts == 0 {
      bail!("启动检查失败: {}", failure);
    }
    restarts -= 1;
    info!("重新执行启动检查，剩余 {} 次", restarts);
    run = sequencer.restart(&run)?;
  }

  let Some(command) = args.command else {
    return Ok(());
  };

  let envelope = match command {
    Command::Images => client.get_static_data(),
    Command::Check { model_path } => client.check_model(&model_path),
    Command::Load {
      model_path,
      model_type,
    } => client.load_model(&model_path, &model_type),
    Command::Infer {
      image_path,
      model_path,
      background,
    } => {
      if background {
        client.inference_async(&image_path, &model_path)
      } else {
        client.inference(&image_path, &model_path)
      }
    }
    Command::Detect {
      image_path,
      model_paths,
    } => client.detection(&image_path, &model_paths),
    Command::FeatureMap {
      model_name,
      layer_name,
    } => client.get_feature_map(&model_name, &layer_name),
    Command::Pid => client.get_pid(),
    Command::Cpu => client.get_cpu_usage(),
    Command::Gpu => client.get_gpu_usage(),
    Command::Alert => client.check_alert(),
    Command::Trend { data } => client.trend_inference(serde_json::from_str::<Value>(&data)?),
    Command::TrendCheck { image_series } => client.check_trend(serde_json::from_str::<Vec<Value>>(&image_series)?),
    Command::Signal { payload } => client.send_signal(serde_json::from_str::<Value>(&payload)?),
  };

  print(&envelope)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn trend_check_takes_json_series() {
    let args = Args::try_parse_from(["shaowei-client", "trend-check", r#"["a.png", "b.png"]"#]).unwrap();
    let Some(Command::TrendCheck { image_series }) = args.command else {
      panic!("unexpected command: {:?}", args.command);
    };
    let series: Vec<Value> = serde_json::from_str(&image_series).unwrap();
    assert_eq!(series.len(), 2);
  }
}
