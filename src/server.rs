// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::{collections::HashMap, future::Future, sync::Arc};

use axum::{
  Json, Router,
  body::Bytes,
  extract::{Query, State},
  routing::{get, post},
};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
  config::ServerConfig,
  gateway::Gateway,
  protocol::{Envelope, Method, OperationKind},
};

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 每个操作对应一条路由；HTTP 状态恒为 200，错误放在 Envelope 中
pub fn router(gateway: Arc<Gateway>) -> Router {
  let mut router = Router::new();
  for kind in OperationKind::ALL {
    router = match kind.method() {
      Method::Get => router.route(
        kind.path(),
        get(
          move |State(gateway): State<Arc<Gateway>>, Query(query): Query<HashMap<String, String>>| {
            let params: Map<String, Value> = query.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            run(gateway, kind, Value::Object(params))
          },
        ),
      ),
      Method::Post => router.route(
        kind.path(),
        post(move |State(gateway): State<Arc<Gateway>>, body: Bytes| async move {
          match parse_body(&body) {
            Ok(params) => run(gateway, kind, params).await,
            Err(err) => Json(Envelope::error(format!("请求体不是有效的 JSON: {}", err))),
          }
        }),
      ),
    };
  }

  router.layer(TraceLayer::new_for_http()).with_state(gateway)
}

fn parse_body(body: &[u8]) -> serde_json::Result<Value> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  serde_json::from_slice(body)
}

/// 推理与文件读取会阻塞，放到阻塞线程池执行
async fn run(gateway: Arc<Gateway>, kind: OperationKind, params: Value) -> Json<Envelope> {
  let envelope = tokio::task::spawn_blocking(move || gateway.handle(kind, &params))
    .await
    .unwrap_or_else(|err| {
      error!("操作 {} 的工作线程异常: {}", kind, err);
      Envelope::error(format!("操作 {} 发生内部错误", kind))
    });
  Json(envelope)
}

pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
  Ok(TcpListener::bind(config.addr()).await?)
}

/// 运行服务直到 `shutdown` 完成
pub async fn serve(
  listener: TcpListener,
  gateway: Arc<Gateway>,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
  let addr = listener.local_addr()?;
  info!("服务监听 http://{}", addr);
  for kind in OperationKind::ALL {
    info!("  {:?} {} - {}", kind.method(), kind.path(), kind);
  }

  axum::serve(listener, router(gateway))
    .with_graceful_shutdown(shutdown)
    .await?;

  info!("服务已停止");
  Ok(())
}
