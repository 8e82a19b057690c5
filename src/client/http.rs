// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/client/http.rs - HTTP 传输
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

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Transport, TransportError};
use crate::{
  FromUrl, FromUrlWithScheme,
  protocol::{Envelope, Method, Operation},
};

/// 基于 reqwest 阻塞客户端的传输，例如 `http://127.0.0.1:5000`
#[derive(Debug, Clone)]
pub struct HttpTransport {
  base: Url,
  client: Client,
}

impl FromUrlWithScheme for HttpTransport {
  const SCHEME: &'static str = "http";
}

impl FromUrl for HttpTransport {
  type Error = TransportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TransportError::Other(format!("URI 方案不匹配: {}", url.scheme())));
    }
    let client = Client::builder()
      .build()
      .map_err(|err| TransportError::Other(err.to_string()))?;
    Ok(Self {
      base: url.clone(),
      client,
    })
  }
}

impl HttpTransport {
  pub fn base(&self) -> &Url {
    &self.base
  }
}

fn classify(err: reqwest::Error) -> TransportError {
  if err.is_timeout() {
    TransportError::Timeout(err.to_string())
  } else if err.is_connect() {
    TransportError::ConnectionRefused(err.to_string())
  } else {
    TransportError::Other(err.to_string())
  }
}

/// GET 参数按查询串发送，非字符串值使用其 JSON 文本
fn query_pairs(params: &Value) -> Vec<(String, String)> {
  let Some(map) = params.as_object() else {
    return Vec::new();
  };
  map
    .iter()
    .map(|(k, v)| {
      let v = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      (k.clone(), v)
    })
    .collect()
}

impl Transport for HttpTransport {
  fn send(&self, op: &Operation, timeout: Duration) -> Result<Envelope, TransportError> {
    let kind = op.kind();
    let url = self
      .base
      .join(kind.path())
      .map_err(|err| TransportError::Other(err.to_string()))?;
    debug!("{:?} {}", kind.method(), url);

    let request = match kind.method() {
      Method::Get => self.client.get(url).query(&query_pairs(&op.params())),
      Method::Post => self.client.post(url).json(&op.params()),
    };
    let response = request.timeout(timeout).send().map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::Other(format!("HTTP {}", status)));
    }

    response.json::<Envelope>().map_err(|err| {
      if err.is_timeout() {
        TransportError::Timeout(err.to_string())
      } else {
        TransportError::Malformed(err.to_string())
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn only_http_scheme_is_accepted() {
    let url = Url::parse("http://127.0.0.1:5000").unwrap();
    assert!(HttpTransport::from_url(&url).is_ok());

    let url = Url::parse("ftp://127.0.0.1:5000").unwrap();
    assert!(matches!(HttpTransport::from_url(&url), Err(TransportError::Other(_))));
  }

  #[test]
  fn query_pairs_stringify_values() {
    let mut pairs = query_pairs(&json!({"model_name": "m", "layer": 3}));
    pairs.sort();
    assert_eq!(
      pairs,
      vec![
        ("layer".to_string(), "3".to_string()),
        ("model_name".to_string(), "m".to_string()),
      ]
    );
    assert!(query_pairs(&Value::Null).is_empty());
  }
}
