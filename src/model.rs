// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/model.rs - 模型元数据、版本与加载器
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  runtime::{CompiledModel, EngineError},
};

pub mod checksum;
mod loader;
mod watcher;

pub use self::loader::{ModelLoader, ReloadObserver};

/// 不带版本号的模型文件对应的版本名
pub const LATEST_VERSION: &str = "latest";

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  NotFound(String),
  #[error("参数无效: {0}")]
  InvalidArgument(String),
  #[error("推理引擎不可用: {0}")]
  Unavailable(#[source] EngineError),
  #[error("模型编译失败: {0}")]
  Compile(#[source] EngineError),
  #[error("当前没有已加载的模型")]
  NoModelLoaded,
  #[error("模型文件读取错误: {0}")]
  Io(#[from] std::io::Error),
}

impl From<EngineError> for ModelError {
  fn from(err: EngineError) -> Self {
    if err.is_unavailable() {
      ModelError::Unavailable(err)
    } else {
      ModelError::Compile(err)
    }
  }
}

impl ModelError {
  pub fn is_caller_error(&self) -> bool {
    matches!(self, ModelError::InvalidArgument(_))
  }

  /// 文件可能稍后出现或被修复
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      ModelError::NotFound(_) | ModelError::Io(_) | ModelError::Compile(_)
    )
  }
}

/// 模型文件格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFormat {
  /// `.xml` 定义 + `.bin` 权重
  #[serde(rename = "openvino")]
  NativeIr,
  /// 单个 `.onnx` 文件
  #[serde(rename = "onnx")]
  Interchange,
}

impl ModelFormat {
  pub const ALL: [ModelFormat; 2] = [ModelFormat::NativeIr, ModelFormat::Interchange];

  pub fn extension(&self) -> &'static str {
    match self {
      ModelFormat::NativeIr => "xml",
      ModelFormat::Interchange => "onnx",
    }
  }

  pub fn weights_extension(&self) -> Option<&'static str> {
    match self {
      ModelFormat::NativeIr => Some("bin"),
      ModelFormat::Interchange => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ModelFormat::NativeIr => "openvino",
      ModelFormat::Interchange => "onnx",
    }
  }
}

impl fmt::Display for ModelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModelFormat {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "openvino" | "ir" | "native-ir" => Ok(ModelFormat::NativeIr),
      "onnx" | "interchange" => Ok(ModelFormat::Interchange),
      other => Err(ModelError::InvalidArgument(format!(
        "不支持的模型格式: {}",
        other
      ))),
    }
  }
}

/// 当前模型的元数据，发布后不再修改
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelInfo {
  pub name: String,
  pub version: String,
  pub format: ModelFormat,
  /// `.xml` 或 `.onnx`
  pub path: PathBuf,
  pub weights_path: Option<PathBuf>,
  pub checksum: Option<String>,
  pub loaded_at: Option<DateTime<Utc>>,
  pub input_shape: Vec<usize>,
  pub output_shape: Vec<usize>,
}

/// 模型目录中的一个版本
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelVersion {
  pub version: String,
  pub format: ModelFormat,
  pub path: PathBuf,
  pub checksum: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
  Unloaded,
  Loading,
  Active,
  Reloading,
  Failed,
}

impl fmt::Display for ModelState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ModelState::Unloaded => "unloaded",
      ModelState::Loading => "loading",
      ModelState::Active => "active",
      ModelState::Reloading => "reloading",
      ModelState::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// 元数据与已编译模型，作为一个整体原子发布
#[derive(Clone)]
pub struct LoadedModel {
  pub info: Arc<ModelInfo>,
  pub compiled: Arc<dyn CompiledModel>,
}

impl fmt::Debug for LoadedModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadedModel")
      .field("info", &self.info)
      .finish_non_exhaustive()
  }
}

/// 通过 URL 指定的模型
///
/// `openvino:///models/yolov8n?version=v2.0` 表示目录 `/models` 下的
/// `yolov8n_v2.0.xml`，省略 version 时加载最新版本。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
  pub dir: PathBuf,
  pub name: String,
  pub format: ModelFormat,
  pub version: Option<String>,
}

impl FromUrl for ModelSpec {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let format = ModelFormat::from_str(url.scheme())?;

    let path = Path::new(url.path());
    let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .filter(|n| !n.is_empty())
      .ok_or_else(|| ModelError::InvalidArgument(format!("模型路径缺少模型名称: {}", url)))?
      .to_string();
    let dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("/"));

    let version = url
      .query_pairs()
      .find(|(key, _)| key == "version")
      .map(|(_, value)| value.into_owned())
      .filter(|v| !v.is_empty());

    Ok(ModelSpec {
      dir,
      name,
      format,
      version,
    })
  }
}
