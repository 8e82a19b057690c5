// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, input::EncodedImage, model::InferenceResult,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_feature_maps")]
mod feature_map_output;
#[cfg(feature = "save_feature_maps")]
pub use self::feature_map_output::FeatureMapOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("特征图 {0} 尺寸与数据长度不符")]
  InvalidMap(String),
}

/// 丢弃结果，只用于计时
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOutput;

impl FromUrlWithScheme for DiscardOutput {
  const SCHEME: &'static str = "null";
}

impl FromUrl for DiscardOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(DiscardOutput)
  }
}

impl Render<EncodedImage, InferenceResult> for DiscardOutput {
  type Error = OutputError;

  fn render_result(&self, _frame: &EncodedImage, _result: &InferenceResult) -> Result<(), Self::Error> {
    Ok(())
  }
}

pub enum OutputWrapper {
  #[cfg(feature = "save_feature_maps")]
  FeatureMaps(FeatureMapOutput),
  Discard(DiscardOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_feature_maps")]
      FeatureMapOutput::SCHEME => Ok(OutputWrapper::FeatureMaps(FeatureMapOutput::from_url(url)?)),
      DiscardOutput::SCHEME => Ok(OutputWrapper::Discard(DiscardOutput::from_url(url)?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render<EncodedImage, InferenceResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &EncodedImage, result: &InferenceResult) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_feature_maps")]
      OutputWrapper::FeatureMaps(output) => output.render_result(frame, result),
      OutputWrapper::Discard(output) => output.render_result(frame, result),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_output_scheme_is_rejected() {
    let url = Url::parse("rtsp://0.0.0.0:8554/live").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(scheme)) if scheme == "rtsp"
    ));

    let url = Url::parse("null:").unwrap();
    assert!(matches!(OutputWrapper::from_url(&url), Ok(OutputWrapper::Discard(_))));
  }
}
