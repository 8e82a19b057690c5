// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/gateway/stubs.rs - 趋势与告警占位实现
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

//! 这些操作不含任何检测算法，只返回固定的占位数据。

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPrediction {
  pub trend: &'static str,
  pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendCheck {
  pub expanding: bool,
  pub rate: f64,
  pub confidence: f64,
}

pub fn trend_prediction() -> TrendPrediction {
  TrendPrediction {
    trend: "increasing",
    probability: 0.85,
  }
}

pub fn trend_check() -> TrendCheck {
  TrendCheck {
    expanding: true,
    rate: 0.15,
    confidence: 0.92,
  }
}

pub fn alert_raised() -> bool {
  false
}
