// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/logging.rs - 日志初始化
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
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

#[derive(Error, Debug)]
pub enum LoggingError {
  #[error("日志级别无效: {0}")]
  Filter(#[from] tracing_subscriber::filter::ParseError),
  #[error("日志初始化失败: {0}")]
  Init(String),
}

/// 兼容 WARNING / CRITICAL 等写法
pub fn normalize_level(level: &str) -> String {
  match level.trim().to_ascii_lowercase().as_str() {
    "warning" => "warn".to_string(),
    "critical" | "fatal" => "error".to_string(),
    other => other.to_string(),
  }
}

/// 设置全局日志订阅者，`RUST_LOG` 优先于配置中的级别
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
  let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
    Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
    _ => EnvFilter::try_new(normalize_level(&config.level))?,
  };

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false);

  match config.format {
    LogFormat::Text => builder.try_init(),
    LogFormat::Json => builder.json().try_init(),
  }
  .map_err(|e| LoggingError::Init(e.to_string()))
}
