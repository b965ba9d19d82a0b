// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/config.rs - 命令行参数与配置文件
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

use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  detection::COCO_CLASSES,
  filter::DetectionFilter,
  frame::ChannelOrder,
  inference::InferenceOptions,
  model::{ModelError, ModelSpec},
  postprocess::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD},
  preprocess::DEFAULT_TARGET_SIZE,
  runtime::DEVICE_AUTO,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("模型地址无效: {0}")]
  ModelUrl(String),
  #[error("模型配置错误: {0}")]
  Model(#[from] ModelError),
  #[error("监听地址无效: {0}")]
  Address(String),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// Shanan Edge 推理服务参数
///
/// 未指定的参数依次取环境变量、配置文件、默认值。
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件路径
  #[arg(long, env = "AI_CONFIG", value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 模型地址，例如 openvino:///models/yolov8n?version=v2.0 或 onnx:///models/yolov8n
  #[arg(long, env = "AI_MODEL", value_name = "MODEL")]
  pub model: Option<Url>,

  /// 推理设备 (AUTO, CPU, GPU ...)
  #[arg(long, env = "AI_DEVICE", value_name = "DEVICE")]
  pub device: Option<String>,

  /// 监听地址
  #[arg(long, env = "AI_HOST", value_name = "HOST")]
  pub host: Option<String>,

  /// 监听端口
  #[arg(long, env = "AI_PORT", value_name = "PORT")]
  pub port: Option<u16>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "AI_CONFIDENCE_THRESHOLD", value_name = "THRESHOLD")]
  pub confidence_threshold: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "AI_NMS_THRESHOLD", value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 热更新检查间隔（秒）
  #[arg(long, env = "AI_HOT_RELOAD_INTERVAL", value_name = "SECONDS")]
  pub hot_reload_interval: Option<f64>,

  /// 关闭模型热更新
  #[arg(long, env = "AI_NO_HOT_RELOAD")]
  pub no_hot_reload: bool,

  /// 日志级别 (trace, debug, info, warn, error)
  #[arg(long, env = "AI_LOG_LEVEL", value_name = "LEVEL")]
  pub log_level: Option<String>,

  /// 日志格式
  #[arg(long, env = "AI_LOG_FORMAT", value_enum, value_name = "FORMAT")]
  pub log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  #[default]
  Text,
  Json,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
  pub level: String,
  pub format: LogFormat,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      format: LogFormat::Text,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".to_string(),
      port: 8080,
    }
  }
}

impl ServerConfig {
  pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
    format!("{}:{}", self.host, self.port)
      .parse()
      .map_err(|_| ConfigError::Address(format!("{}:{}", self.host, self.port)))
  }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
  /// 模型地址
  pub url: String,
  pub device: String,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  /// 模型输入 [width, height]
  pub input_size: [u32; 2],
  pub channel_order: ChannelOrder,
  /// 类别名称，缺省为 COCO 80 类
  pub class_names: Option<Vec<String>>,
  pub hot_reload: bool,
  pub hot_reload_interval_secs: f64,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      url: "onnx:///models/yolov8n".to_string(),
      device: DEVICE_AUTO.to_string(),
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      input_size: [DEFAULT_TARGET_SIZE.0, DEFAULT_TARGET_SIZE.1],
      channel_order: ChannelOrder::Rgb,
      class_names: None,
      hot_reload: true,
      hot_reload_interval_secs: 5.0,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
  pub min_confidence: f32,
  pub enabled_classes: Option<Vec<String>>,
  pub min_area: f32,
  pub max_area: Option<f32>,
}

impl Default for FilterConfig {
  fn default() -> Self {
    let filter = DetectionFilter::default();
    Self {
      min_confidence: filter.min_confidence,
      enabled_classes: None,
      min_area: filter.min_area,
      max_area: None,
    }
  }
}

/// 完整配置
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub server: ServerConfig,
  pub model: ModelConfig,
  pub filter: FilterConfig,
  pub log: LogConfig,
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::Invalid(format!(
      "{} 必须在 0.0 到 1.0 之间, 实际为 {}",
      name, value
    )))
  }
}

impl Config {
  pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(content)?)
  }

  /// 读取配置文件（若指定）并应用命令行与环境变量覆盖
  pub fn load(args: &Args) -> Result<Self, ConfigError> {
    let mut config = match &args.config {
      Some(path) => {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
          path: path.clone(),
          source,
        })?;
        Self::from_toml(&content)?
      }
      None => Self::default(),
    };

    config.apply_args(args);
    config.validate()?;
    Ok(config)
  }

  pub fn apply_args(&mut self, args: &Args) {
    if let Some(model) = &args.model {
      self.model.url = model.to_string();
    }
    if let Some(device) = &args.device {
      self.model.device = device.clone();
    }
    if let Some(host) = &args.host {
      self.server.host = host.clone();
    }
    if let Some(port) = args.port {
      self.server.port = port;
    }
    if let Some(threshold) = args.confidence_threshold {
      self.model.confidence_threshold = threshold;
    }
    if let Some(threshold) = args.nms_threshold {
      self.model.nms_threshold = threshold;
    }
    if let Some(interval) = args.hot_reload_interval {
      self.model.hot_reload_interval_secs = interval;
    }
    if args.no_hot_reload {
      self.model.hot_reload = false;
    }
    if let Some(level) = &args.log_level {
      self.log.level = level.clone();
    }
    if let Some(format) = args.log_format {
      self.log.format = format;
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    check_unit("model.confidence_threshold", self.model.confidence_threshold)?;
    check_unit("model.nms_threshold", self.model.nms_threshold)?;
    check_unit("filter.min_confidence", self.filter.min_confidence)?;

    if !(self.model.hot_reload_interval_secs > 0.0 && self.model.hot_reload_interval_secs.is_finite())
    {
      return Err(ConfigError::Invalid(format!(
        "热更新间隔必须大于 0, 实际为 {}",
        self.model.hot_reload_interval_secs
      )));
    }
    if self.model.input_size.contains(&0) {
      return Err(ConfigError::Invalid(format!(
        "模型输入尺寸无效: {:?}",
        self.model.input_size
      )));
    }
    if self.model.device.trim().is_empty() {
      return Err(ConfigError::Invalid("推理设备不能为空".to_string()));
    }

    self.detection_filter()?;
    self.model_spec()?;
    self.server.socket_addr()?;
    Ok(())
  }

  pub fn model_spec(&self) -> Result<ModelSpec, ConfigError> {
    let url = Url::parse(&self.model.url)
      .map_err(|e| ConfigError::ModelUrl(format!("{}: {}", self.model.url, e)))?;
    Ok(ModelSpec::from_url(&url)?)
  }

  pub fn hot_reload_interval(&self) -> Duration {
    Duration::from_secs_f64(self.model.hot_reload_interval_secs)
  }

  pub fn inference_options(&self) -> InferenceOptions {
    InferenceOptions {
      target_size: (self.model.input_size[0], self.model.input_size[1]),
      confidence_threshold: self.model.confidence_threshold,
      nms_threshold: self.model.nms_threshold,
      channel_order: self.model.channel_order,
      class_names: self
        .model
        .class_names
        .clone()
        .unwrap_or_else(|| COCO_CLASSES.iter().map(|s| s.to_string()).collect()),
    }
  }

  pub fn detection_filter(&self) -> Result<DetectionFilter, ConfigError> {
    let filter = DetectionFilter {
      enabled_classes: self
        .filter
        .enabled_classes
        .clone()
        .map(|c| c.into_iter().collect()),
      min_confidence: self.filter.min_confidence,
      min_area: self.filter.min_area,
      max_area: self.filter.max_area.unwrap_or(f32::INFINITY),
    };
    filter
      .validate()
      .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(filter)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ModelFormat;

  #[test]
  fn defaults_are_valid() {
    let config = Config::default();
    config.validate().unwrap();
    assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
    assert_eq!(config.hot_reload_interval(), Duration::from_secs(5));
    assert_eq!(config.inference_options().class_names.len(), 80);

    // 默认构建的后端可以直接加载默认模型
    let spec = config.model_spec().unwrap();
    assert_eq!(spec.format, ModelFormat::Interchange);
    assert_eq!(spec.name, "yolov8n");
  }

  #[test]
  fn parse_toml_sections() {
    let config = Config::from_toml(
      r#"
        [server]
        port = 9000

        [model]
        url = "onnx:///opt/models/detector?version=v3"
        device = "CPU"
        input_size = [416, 416]
        channel_order = "bgr"
        hot_reload = false

        [filter]
        min_confidence = 0.6
        enabled_classes = ["person", "car"]
        max_area = 50000.0

        [log]
        level = "debug"
        format = "json"
      "#,
    )
    .unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.log.format, LogFormat::Json);
    assert!(!config.model.hot_reload);

    let spec = config.model_spec().unwrap();
    assert_eq!(spec.format, ModelFormat::Interchange);
    assert_eq!(spec.version.as_deref(), Some("v3"));

    let options = config.inference_options();
    assert_eq!(options.target_size, (416, 416));
    assert_eq!(options.channel_order, ChannelOrder::Bgr);

    let filter = config.detection_filter().unwrap();
    assert_eq!(filter.min_confidence, 0.6);
    assert_eq!(filter.enabled_classes.unwrap().len(), 2);
    assert_eq!(filter.max_area, 50000.0);
  }

  #[test]
  fn unknown_keys_are_rejected() {
    assert!(matches!(
      Config::from_toml("[model]\nthreshold = 0.3\n"),
      Err(ConfigError::Parse(_))
    ));
  }

  #[test]
  fn arguments_override_file() {
    let mut config = Config::from_toml("[model]\nconfidence_threshold = 0.3\n").unwrap();
    let args = Args::try_parse_from([
      "shanan-edge",
      "--confidence-threshold",
      "0.7",
      "--port",
      "9100",
      "--model",
      "openvino:///srv/models/yolov8n",
      "--no-hot-reload",
      "--log-format",
      "json",
    ])
    .unwrap();
    config.apply_args(&args);

    assert_eq!(config.model.confidence_threshold, 0.7);
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.model.url, "openvino:///srv/models/yolov8n");
    assert!(!config.model.hot_reload);
    assert_eq!(config.log.format, LogFormat::Json);
    config.validate().unwrap();
  }

  #[test]
  fn invalid_values_are_rejected() {
    let mut config = Config::default();
    config.model.confidence_threshold = 1.5;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.model.hot_reload_interval_secs = 0.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.model.url = "tflite:///models/x".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::Model(_))));

    let mut config = Config::default();
    config.filter.min_area = 10.0;
    config.filter.max_area = Some(1.0);
    assert!(config.validate().is_err());
  }
}
