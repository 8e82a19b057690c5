// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/protocol.rs - 服务端与客户端之间的线上协议
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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod operation;

pub use self::operation::{Method, Operation, OperationKind, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Success,
  Error,
}

/// 所有跨边界响应的统一外壳：`{status, ...fields}` 或 `{status, message}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl Envelope {
  /// 对象载荷展开为顶层字段，其余载荷放入 `data`
  pub fn success(payload: Value) -> Self {
    let fields = match payload {
      Value::Object(map) => map,
      Value::Null => Map::new(),
      other => {
        let mut map = Map::new();
        map.insert("data".to_string(), other);
        map
      }
    };
    Self {
      status: Status::Success,
      message: None,
      fields,
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      status: Status::Error,
      message: Some(message.into()),
      fields: Map::new(),
    }
  }

  pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(key.into(), value.into());
    self
  }

  pub fn is_success(&self) -> bool {
    self.status == Status::Success
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.fields.get(key)
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn success_flattens_payload() {
    let envelope = Envelope::success(json!({"pid": 42}));
    let wire = serde_json::to_value(&envelope).unwrap();
    assert_eq!(wire, json!({"status": "success", "pid": 42}));
  }

  #[test]
  fn error_carries_message_only() {
    let envelope = Envelope::error("模型未加载").with_field("reason", "Timeout");
    let wire = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
      wire,
      json!({"status": "error", "message": "模型未加载", "reason": "Timeout"})
    );
  }

  #[test]
  fn non_object_payload_goes_to_data() {
    let envelope = Envelope::success(json!([1, 2, 3]));
    assert_eq!(envelope.get("data"), Some(&json!([1, 2, 3])));
  }

  #[test]
  fn status_is_required_on_the_wire() {
    let decoded: Envelope =
      serde_json::from_value(json!({"status": "error", "message": "boom"})).unwrap();
    assert!(!decoded.is_success());
    assert_eq!(decoded.message(), Some("boom"));
    assert!(decoded.fields.is_empty());

    assert!(serde_json::from_value::<Envelope>(json!({"pid": 1})).is_err());
    assert!(serde_json::from_value::<Envelope>(json!({"status": "maybe"})).is_err());
  }
}
