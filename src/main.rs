// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/main.rs - 推理服务主程序
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

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use shanan_edge::{
  config::{Args, Config},
  filter::DetectionLogic,
  health::SERVICE_VERSION,
  inference::InferenceEngine,
  logging,
  model::ModelLoader,
  runtime::Runtime,
  server::{self, AppState},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let config = Config::load(&args).context("加载配置失败")?;
  logging::init(&config.log).context("初始化日志失败")?;

  info!("Shanan Edge 推理服务 v{}", SERVICE_VERSION);
  info!("模型地址: {}", config.model.url);
  info!("监听地址: {}:{}", config.server.host, config.server.port);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    config.model.confidence_threshold, config.model.nms_threshold
  );

  let spec = config.model_spec()?;
  let addr = config.server.socket_addr()?;

  let runtime = Runtime::detect(&config.model.device).context("推理引擎不可用")?;
  info!(
    "推理后端: {}, 设备: {}, 可用设备: {:?}",
    runtime.backend_name(),
    runtime.device(),
    runtime.available_devices()
  );

  let loader = Arc::new(ModelLoader::new(spec.dir.clone(), runtime));
  let engine = Arc::new(InferenceEngine::new(
    loader.clone(),
    config.inference_options(),
  ));
  let logic = Arc::new(DetectionLogic::new(config.detection_filter()?)?);

  // 加载失败时服务仍启动，保持未就绪
  let initial = {
    let loader = loader.clone();
    let spec = spec.clone();
    tokio::task::spawn_blocking(move || {
      loader.load(&spec.name, spec.format, spec.version.as_deref())
    })
    .await?
  };
  match initial {
    Ok(info) => info!("初始模型已加载: {} 版本 {}", info.name, info.version),
    Err(e) => warn!("初始模型加载失败, 服务以未就绪状态启动: {}", e),
  }

  if config.model.hot_reload {
    loader.start_hot_reload_monitoring(config.hot_reload_interval());
  } else {
    info!("模型热更新已关闭");
  }

  let (stop_tx, mut stop_rx) = watch::channel(false);
  ctrlc::set_handler(move || {
    info!("收到退出信号, 正在停止服务...");
    let _ = stop_tx.send(true);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法注册退出信号处理")?;

  let mut state = AppState::new(engine, logic);
  if config.model.hot_reload {
    state = state.with_hot_reload(config.hot_reload_interval());
  }
  let state = Arc::new(state);
  let shutdown = async move {
    let _ = stop_rx.wait_for(|stop| *stop).await;
  };

  let result = server::serve(addr, state, shutdown).await;
  loader.stop_hot_reload_monitoring();
  result.with_context(|| format!("HTTP 服务异常退出: {}", addr))?;

  info!("服务已退出");
  Ok(())
}
