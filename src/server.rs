// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
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

mod health;
mod inference;
mod models;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
  Json, Router,
  extract::DefaultBodyLimit,
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use self::inference::{BatchInferenceResponse, InferenceResponse};
pub use self::models::FilterView;

use crate::{
  codec::CodecError,
  filter::{DetectionLogic, FilterError},
  health::ServiceHealth,
  inference::{InferenceEngine, InferenceError},
  model::ModelError,
};

/// Base64 图像批量请求可能较大
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// 请求处理共享的状态
pub struct AppState {
  pub engine: Arc<InferenceEngine>,
  pub logic: Arc<DetectionLogic>,
  pub health: Arc<ServiceHealth>,
  /// 热更新检查间隔，None 表示关闭
  pub hot_reload: Option<Duration>,
}

impl AppState {
  pub fn new(engine: Arc<InferenceEngine>, logic: Arc<DetectionLogic>) -> Self {
    let health = Arc::new(ServiceHealth::new(engine.loader().clone()));
    Self {
      engine,
      logic,
      health,
      hot_reload: None,
    }
  }

  pub fn with_hot_reload(mut self, interval: Duration) -> Self {
    self.hot_reload = Some(interval);
    self
  }

  /// 启动时模型未能加载的情况下，手动加载成功后补启动监控
  fn ensure_monitoring(&self) {
    let loader = self.engine.loader();
    if let Some(interval) = self.hot_reload {
      if !loader.is_monitoring() {
        loader.start_hot_reload_monitoring(interval);
      }
    }
  }
}

pub type SharedState = Arc<AppState>;

/// 错误响应，响应体为 `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
  status: StatusCode,
  detail: String,
}

impl ApiError {
  pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
    Self {
      status,
      detail: detail.into(),
    }
  }

  pub fn bad_request(detail: impl Into<String>) -> Self {
    Self::new(StatusCode::BAD_REQUEST, detail)
  }

  pub fn internal(detail: impl Into<String>) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if self.status.is_server_error() {
      error!("请求处理失败: {} {}", self.status, self.detail);
    }
    (self.status, Json(json!({ "detail": self.detail }))).into_response()
  }
}

impl From<InferenceError> for ApiError {
  fn from(err: InferenceError) -> Self {
    let status = match &err {
      InferenceError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
      e if e.is_caller_error() => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Self::new(status, err.to_string())
  }
}

impl From<ModelError> for ApiError {
  fn from(err: ModelError) -> Self {
    let status = match &err {
      ModelError::NoModelLoaded => StatusCode::SERVICE_UNAVAILABLE,
      ModelError::NotFound(_) => StatusCode::NOT_FOUND,
      e if e.is_caller_error() => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Self::new(status, err.to_string())
  }
}

impl From<CodecError> for ApiError {
  fn from(err: CodecError) -> Self {
    Self::bad_request(err.to_string())
  }
}

impl From<FilterError> for ApiError {
  fn from(err: FilterError) -> Self {
    Self::bad_request(err.to_string())
  }
}

/// 在阻塞线程池中执行推理等 CPU 密集任务
async fn run_blocking<T, F>(task: F) -> Result<T, ApiError>
where
  F: FnOnce() -> Result<T, ApiError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(task)
    .await
    .map_err(|e| ApiError::internal(format!("后台任务异常: {}", e)))?
}

pub fn router(state: SharedState) -> Router {
  let api = Router::new()
    .route("/inference", post(inference::infer))
    .route("/inference/batch", post(inference::infer_batch))
    .route("/inference/file", post(inference::infer_file))
    .route("/inference/stats", get(inference::statistics))
    .route("/inference/stats/reset", post(inference::reset_statistics))
    .route("/models/current", get(models::current))
    .route("/models/reload", post(models::reload))
    .route("/models/:name/versions", get(models::versions))
    .route("/filter", get(models::get_filter).put(models::put_filter));

  Router::new()
    .route("/health", get(health::ok))
    .route("/health/", get(health::ok))
    .route("/health/live", get(health::live))
    .route("/health/ready", get(health::ready))
    .route("/health/detailed", get(health::detailed))
    .nest("/api/v1", api)
    .with_state(state)
    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
    .layer(TraceLayer::new_for_http())
}

/// 绑定地址并运行，直到 `shutdown` 完成
pub async fn serve(
  addr: SocketAddr,
  state: SharedState,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
  let listener = TcpListener::bind(addr).await?;
  info!("HTTP 服务监听于 {}", listener.local_addr()?);
  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown)
    .await?;
  info!("HTTP 服务已停止");
  Ok(())
}
