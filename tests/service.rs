// 该文件是 Shaowei （哨卫） 项目的一部分。
// tests/service.rs - 服务端与客户端联调测试
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

#![cfg(all(feature = "server", feature = "client"))]

use std::{
  net::SocketAddr,
  sync::Arc,
  thread::JoinHandle,
  time::{Duration, Instant},
};

use image::{Rgb, RgbImage};
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use shaowei::{
  FromUrl,
  client::{FailureReason, HttpTransport, ResilientClient},
  config::{EngineConfig, GatewayConfig, RetryPolicy},
  gateway::Gateway,
  model::InferenceEngine,
  server,
  startup::{StartupEvent, StartupSequencer, StartupState},
  telemetry::TelemetryCache,
};

struct Service {
  addr: SocketAddr,
  stop: Option<tokio::sync::oneshot::Sender<()>>,
  thread: Option<JoinHandle<()>>,
  dir: TempDir,
}

impl Service {
  fn boot() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("models");
    let static_dir = dir.path().join("images");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::create_dir_all(&static_dir).unwrap();

    let engine = Arc::new(InferenceEngine::new(EngineConfig {
      weights_dir: None,
      num_classes: 8,
    }));
    let seed = engine.select("resnet18", false).unwrap();
    engine.save_weights(&seed, model_dir.join("r18.safetensors")).unwrap();
    RgbImage::from_fn(300, 260, |x, y| Rgb([(x / 3) as u8, (y / 3) as u8, 128]))
      .save(static_dir.join("sample.png"))
      .unwrap();

    let gateway = Arc::new(Gateway::new(
      engine,
      Arc::new(TelemetryCache::new()),
      GatewayConfig {
        model_dir,
        static_dir,
        detection_threshold: 0.5,
      },
    ));

    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let thread = std::thread::spawn(move || {
      let runtime = tokio::runtime::Runtime::new().unwrap();
      runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        addr_tx.send(listener.local_addr().unwrap()).unwrap();
        server::serve(listener, gateway, async move {
          let _ = stop_rx.await;
        })
        .await
        .unwrap();
      });
    });

    Self {
      addr: addr_rx.recv_timeout(Duration::from_secs(10)).unwrap(),
      stop: Some(stop_tx),
      thread: Some(thread),
      dir,
    }
  }

  fn image(&self) -> String {
    self.dir.path().join("images/sample.png").to_string_lossy().into_owned()
  }
}

impl Drop for Service {
  fn drop(&mut self) {
    if let Some(stop) = self.stop.take() {
      let _ = stop.send(());
    }
    if let Some(thread) = self.thread.take() {
      let _ = thread.join();
    }
  }
}

fn client(addr: SocketAddr, policy: RetryPolicy) -> ResilientClient<HttpTransport> {
  let url = Url::parse(&format!("http://{}", addr)).unwrap();
  ResilientClient::new(HttpTransport::from_url(&url).unwrap(), policy)
}

fn policy(max_attempts: u32, timeout_ms: u64, delay_ms: u64) -> RetryPolicy {
  RetryPolicy::new(
    max_attempts,
    Duration::from_millis(timeout_ms),
    Duration::from_millis(delay_ms),
  )
  .unwrap()
}

#[test]
fn startup_and_inspection_over_http() {
  let service = Service::boot();
  let client = Arc::new(client(service.addr, policy(3, 10_000, 100)));

  let mut run = StartupSequencer::new(client.clone()).start().unwrap();
  assert_eq!(run.wait(), &StartupState::Succeeded);
  assert_eq!(run.progress(), 100);

  let images = client.get_static_data();
  assert_eq!(images.get("data").unwrap().as_array().unwrap().len(), 1);

  let first = client.load_model("r18.safetensors", "resnet18");
  assert!(first.is_success(), "{:?}", first);
  let second = client.load_model("r18.safetensors", "resnet18");
  assert_eq!(
    first.get("model_info").unwrap()["loaded_time"],
    second.get("model_info").unwrap()["loaded_time"]
  );

  let result = client.inference(&service.image(), "r18.safetensors");
  assert!(result.is_success(), "{:?}", result);
  assert_eq!(result.get("results").unwrap()["predictions"].as_array().unwrap().len(), 5);

  let map = client.get_feature_map("r18.safetensors", "layer4");
  assert_eq!(map.get("feature_map").unwrap()["shape"], json!([7, 7]));

  let empty = client.detection(&service.image(), &[]);
  assert!(!empty.is_success());
  assert_eq!(FailureReason::of(&empty), None);

  let signal = client.send_signal(json!({"command": "refresh"}));
  assert_eq!(signal.get("received"), Some(&json!(true)));

  let check = client.check_model("missing.safetensors");
  assert_eq!(check.get("exists"), Some(&json!(false)));
}

#[test]
fn silent_service_times_out_within_bound() {
  // 已监听但从不应答
  let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  let policy = policy(2, 300, 100);
  let client = client(listener.local_addr().unwrap(), policy);

  let start = Instant::now();
  let envelope = client.get_pid();
  let elapsed = start.elapsed();

  assert!(!envelope.is_success());
  assert_eq!(FailureReason::of(&envelope), Some(FailureReason::Timeout));
  assert!(elapsed >= Duration::from_millis(650), "{:?}", elapsed);
  assert!(elapsed < policy.worst_case() + Duration::from_millis(250), "{:?}", elapsed);
  drop(listener);
}

#[test]
fn released_port_is_connection_refused() {
  let addr = {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
  };
  let client = Arc::new(client(addr, policy(2, 500, 10)));

  let envelope = client.get_cpu_usage();
  assert_eq!(FailureReason::of(&envelope), Some(FailureReason::ConnectionRefused));

  let mut run = StartupSequencer::new(client).start().unwrap();
  let events: Vec<_> = std::iter::from_fn(|| run.next_event()).collect();
  assert_eq!(events[0], StartupEvent::Progress(20));
  assert_eq!(events.len(), 2);
  assert_eq!(run.progress(), 20);
  assert!(matches!(run.state(), StartupState::Failed(_)));
}
