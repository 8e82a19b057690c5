// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/startup.rs - 客户端启动健康检查
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

//! 启动时按固定顺序执行健康检查：连通性、CPU、GPU、静态数据。
//!
//! 进度在进入每个阶段时上报（20/40/60/80），全部通过后上报 100 并结束于
//! `Succeeded`；任一阶段失败立即结束于 `Failed`，其后的阶段不再执行。
//! 失败后只能通过 [`StartupSequencer::restart`] 从第一阶段重新开始。

use std::{
  fmt,
  sync::{
    Arc,
    mpsc::{self, Receiver, Sender},
  },
  thread,
};

use thiserror::Error;
use tracing::{error, info};

use crate::{
  client::{FailureReason, ResilientClient, Transport},
  protocol::Operation,
};

pub const COMPLETE_PERCENT: u8 = 100;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StartupError {
  #[error("只有失败的启动流程可以重启")]
  NotFailed,
  #[error("无法启动检查线程: {0}")]
  Spawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
  Connectivity,
  Cpu,
  Gpu,
  StaticData,
}

impl StartupStage {
  pub const ALL: [StartupStage; 4] = [
    StartupStage::Connectivity,
    StartupStage::Cpu,
    StartupStage::Gpu,
    StartupStage::StaticData,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      StartupStage::Connectivity => "连通性检查",
      StartupStage::Cpu => "CPU 查询",
      StartupStage::Gpu => "GPU 查询",
      StartupStage::StaticData => "静态数据加载",
    }
  }

  /// 进入该阶段时上报的进度
  pub fn percent(&self) -> u8 {
    match self {
      StartupStage::Connectivity => 20,
      StartupStage::Cpu => 40,
      StartupStage::Gpu => 60,
      StartupStage::StaticData => 80,
    }
  }

  fn operation(&self) -> Operation {
    match self {
      StartupStage::Connectivity => Operation::Pid,
      StartupStage::Cpu => Operation::Cpu,
      StartupStage::Gpu => Operation::Gpu,
      StartupStage::StaticData => Operation::ListStaticImages,
    }
  }
}

impl fmt::Display for StartupStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
  pub stage: StartupStage,
  /// 传输层失败时的分类；服务端返回业务错误时为 `None`
  pub reason: Option<FailureReason>,
  pub message: String,
}

impl fmt::Display for StartupFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.reason {
      Some(reason) => write!(f, "{}失败 [{}]: {}", self.stage, reason, self.message),
      None => write!(f, "{}失败: {}", self.stage, self.message),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupState {
  Running,
  Succeeded,
  Failed(StartupFailure),
}

impl StartupState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, StartupState::Running)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupEvent {
  Progress(u8),
  Succeeded,
  Failed(StartupFailure),
}

pub struct StartupSequencer<T> {
  client: Arc<ResilientClient<T>>,
}

impl<T> StartupSequencer<T>
where
  T: Transport + Send + Sync + 'static,
{
  pub fn new(client: Arc<ResilientClient<T>>) -> Self {
    Self { client }
  }

  /// 在独立线程上执行全部检查，事件按顺序送达返回的 `StartupRun`
  pub fn start(&self) -> Result<StartupRun, StartupError> {
    let (tx, rx) = mpsc::channel();
    let client = self.client.clone();
    thread::Builder::new()
      .name("startup-sequencer".to_string())
      .spawn(move || run_stages(&client, &tx))
      .map_err(|err| StartupError::Spawn(err.to_string()))?;

    Ok(StartupRun {
      events: rx,
      state: StartupState::Running,
      progress: 0,
    })
  }

  /// 从第一阶段完整重跑，不做断点续跑
  pub fn restart(&self, previous: &StartupRun) -> Result<StartupRun, StartupError> {
    match previous.state() {
      StartupState::Failed(failure) => {
        info!("重新执行启动检查，上次失败: {}", failure);
        self.start()
      }
      _ => Err(StartupError::NotFailed),
    }
  }
}

fn run_stages<T: Transport>(client: &ResilientClient<T>, tx: &Sender<StartupEvent>) {
  for stage in StartupStage::ALL {
    info!("启动检查: {} ({}%)", stage, stage.percent());
    if tx.send(StartupEvent::Progress(stage.percent())).is_err() {
      return;
    }

    let envelope = client.call(stage.operation());
    if !envelope.is_success() {
      let failure = StartupFailure {
        stage,
        reason: FailureReason::of(&envelope),
        message: envelope.message().unwrap_or("未知错误").to_string(),
      };
      error!("启动检查失败: {}", failure);
      let _ = tx.send(StartupEvent::Failed(failure));
      return;
    }
  }

  info!("启动检查全部通过");
  if tx.send(StartupEvent::Progress(COMPLETE_PERCENT)).is_ok() {
    let _ = tx.send(StartupEvent::Succeeded);
  }
}

/// 一次启动检查的接收端
pub struct StartupRun {
  events: Receiver<StartupEvent>,
  state: StartupState,
  progress: u8,
}

impl StartupRun {
  pub fn state(&self) -> &StartupState {
    &self.state
  }

  pub fn progress(&self) -> u8 {
    self.progress
  }

  /// 阻塞等待下一个事件；流程结束后返回 `None`
  pub fn next_event(&mut self) -> Option<StartupEvent> {
    if self.state.is_terminal() {
      return None;
    }

    let event = match self.events.recv() {
      Ok(event) => event,
      // 检查线程未发出终止事件就退出了
      Err(_) => StartupEvent::Failed(StartupFailure {
        stage: self.current_stage(),
        reason: Some(FailureReason::Unknown),
        message: "检查线程意外退出".to_string(),
      }),
    };

    match &event {
      StartupEvent::Progress(percent) => self.progress = *percent,
      StartupEvent::Succeeded => self.state = StartupState::Succeeded,
      StartupEvent::Failed(failure) => self.state = StartupState::Failed(failure.clone()),
    }
    Some(event)
  }

  pub fn wait(&mut self) -> &StartupState {
    while self.next_event().is_some() {}
    &self.state
  }

  fn current_stage(&self) -> StartupStage {
    StartupStage::ALL
      .into_iter()
      .rev()
      .find(|stage| stage.percent() <= self.progress)
      .unwrap_or(StartupStage::Connectivity)
  }
}
