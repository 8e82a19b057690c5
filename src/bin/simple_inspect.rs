// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/bin/simple_inspect.rs - 本地特征图检视
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use shaowei::{
  FromUrl,
  config::EngineConfig,
  input::InputWrapper,
  model::{InferenceEngine, ModelBuilder},
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};
use tracing::info;

/// Shaowei 本地检视参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，例如 resnet18: 或 vgg16:///models/vgg16.safetensors
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，image:///a.png 或 folder:///images
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，folder:///out 或 null:
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 预训练权重目录
  #[arg(long, value_name = "DIR")]
  pub weights_dir: Option<PathBuf>,
  /// 分类类别数量
  #[arg(long, default_value_t = 1000, value_name = "COUNT")]
  pub num_classes: usize,
  /// 处理目录中的所有图像，0 表示不限数量
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let engine = InferenceEngine::new(EngineConfig::new(
    args.weights_dir,
    args.num_classes,
  )?);
  let input = InputWrapper::from_url(&args.input)?;
  let model = ModelBuilder::from_url(&args.model)?.build(&engine)?;
  let output = OutputWrapper::from_url(&args.output)?;

  match args.frame_number {
    None => OneShotTask.run_task(input, &*model, output)?,
    Some(n) => ContinuousTask::default()
      .with_frame_number((n > 0).then_some(n))
      .run_task(input, &*model, output)?,
  }

  Ok(())
}
