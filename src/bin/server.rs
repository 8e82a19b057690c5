// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/bin/server.rs - 检视服务
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

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use shaowei::{
  config::{EngineConfig, GatewayConfig, SamplerConfig, ServerConfig},
  gateway::Gateway,
  model::{InferenceEngine, available_models},
  server,
  telemetry::{TelemetryCache, TelemetrySampler},
};

/// Shaowei 检视服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value = "127.0.0.1", value_name = "HOST")]
  pub host: String,
  /// 监听端口
  #[arg(long, default_value_t = 5000, value_name = "PORT")]
  pub port: u16,
  /// 模型文件目录
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub model_dir: PathBuf,
  /// 静态图像目录
  #[arg(long, default_value = "data/images", value_name = "DIR")]
  pub static_dir: PathBuf,
  /// 预训练权重目录
  #[arg(long, value_name = "DIR")]
  pub weights_dir: Option<PathBuf>,
  /// 分类类别数量
  #[arg(long, default_value_t = 1000, value_name = "COUNT")]
  pub num_classes: usize,
  /// 检出阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub detection_threshold: f32,
  /// 遥测采样周期（毫秒）
  #[arg(long, default_value_t = 1000, value_name = "MILLIS")]
  pub sample_period: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("模型目录: {:?}", args.model_dir);
  info!("静态图像目录: {:?}", args.static_dir);
  info!("支持的模型: {:?}", available_models());

  std::fs::create_dir_all(&args.model_dir)?;
  std::fs::create_dir_all(&args.static_dir)?;

  let engine = Arc::new(InferenceEngine::new(EngineConfig::new(
    args.weights_dir,
    args.num_classes,
  )?));
  let telemetry = Arc::new(TelemetryCache::new());
  let sampler = TelemetrySampler::new(
    telemetry.clone(),
    &SamplerConfig {
      period: Duration::from_millis(args.sample_period),
    },
  )
  .spawn()?;
  let gateway = Arc::new(Gateway::new(
    engine,
    telemetry,
    GatewayConfig {
      model_dir: args.model_dir,
      static_dir: args.static_dir,
      detection_threshold: args.detection_threshold,
    },
  ));

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let config = ServerConfig {
    host: args.host,
    port: args.port,
  };
  let runtime = tokio::runtime::Runtime::new()?;
  let served = runtime.block_on(async move {
    let listener = server::bind(&config).await?;
    server::serve(listener, gateway, async move {
      rx.recv().await;
    })
    .await
  });

  sampler.stop();
  served?;
  info!("服务退出");
  Ok(())
}
