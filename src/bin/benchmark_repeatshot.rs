// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理计时
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shaowei::{
  FromUrl,
  input::InputWrapper,
  model::{InferenceEngine, ModelBuilder},
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Shaowei 推理计时参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，例如 resnet50:
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，默认丢弃
  #[arg(long, default_value = "null:", value_name = "OUTPUT")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value_t = 100, value_name = "COUNT")]
  pub repeats: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.repeats);

  let engine = InferenceEngine::default();
  let input = InputWrapper::from_url(&args.input)?;
  let model = ModelBuilder::from_url(&args.model)?.build(&engine)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeats(args.repeats)
    .run_task(input, &*model, output)?;

  Ok(())
}
