// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/runtime.rs - 推理引擎抽象与设备选择
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

use std::{fmt, path::PathBuf, sync::Arc};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::{Tensor, TensorError},
  model::ModelFormat,
};

#[cfg(feature = "onnxruntime")]
mod ort_backend;
#[cfg(feature = "onnxruntime")]
pub use self::ort_backend::OrtBackend;

pub const DEVICE_AUTO: &str = "AUTO";
pub const DEVICE_CPU: &str = "CPU";
pub const DEVICE_GPU: &str = "GPU";

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("推理引擎不可用: {0}")]
  Unavailable(String),
  #[error("没有可用的推理设备")]
  NoDevice,
  #[error("后端 {backend} 不支持模型格式 {format}")]
  UnsupportedFormat {
    backend: String,
    format: ModelFormat,
  },
  #[error("模型编译失败: {0}")]
  Compile(String),
  #[error("推理执行失败: {0}")]
  Execution(String),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

impl EngineError {
  /// 引擎或设备缺失，重试不会成功
  pub fn is_unavailable(&self) -> bool {
    matches!(
      self,
      EngineError::Unavailable(_) | EngineError::NoDevice | EngineError::UnsupportedFormat { .. }
    )
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, EngineError::Execution(_))
  }
}

/// 交给后端编译的模型文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
  pub format: ModelFormat,
  /// `.xml` 或 `.onnx`
  pub primary: PathBuf,
  /// `.bin`，仅 NativeIr 格式
  pub weights: Option<PathBuf>,
}

/// 已编译、可并发执行的模型
///
/// 形状中的动态维度记为 0。
pub trait CompiledModel: Send + Sync {
  fn input_shape(&self) -> &[usize];
  fn output_shape(&self) -> &[usize];
  fn run(&self, input: &Tensor) -> Result<Tensor, EngineError>;
}

/// 推理后端
pub trait Backend: Send + Sync {
  fn name(&self) -> &str;
  fn available_devices(&self) -> Vec<String>;
  fn supports(&self, format: ModelFormat) -> bool;
  fn compile(
    &self,
    definition: &ModelDefinition,
    device: &str,
  ) -> Result<Arc<dyn CompiledModel>, EngineError>;
}

/// 按偏好选择设备
///
/// `AUTO` 依次偏好 GPU、CPU、第一个可用设备；指定的设备不存在时回退到 CPU。
pub fn select_device(preferred: &str, available: &[String]) -> Result<String, EngineError> {
  let first = available.first().ok_or(EngineError::NoDevice)?;
  let has = |name: &str| available.iter().find(|d| d.eq_ignore_ascii_case(name));

  if preferred.eq_ignore_ascii_case(DEVICE_AUTO) {
    let device = has(DEVICE_GPU).or_else(|| has(DEVICE_CPU)).unwrap_or(first);
    return Ok(device.clone());
  }

  if let Some(device) = has(preferred) {
    return Ok(device.clone());
  }

  let fallback = has(DEVICE_CPU).unwrap_or(first);
  warn!(
    "首选设备 {} 不可用, 使用 {}, 可用设备: {:?}",
    preferred, fallback, available
  );
  Ok(fallback.clone())
}

/// 启动时探测得到的引擎句柄
#[derive(Clone)]
pub struct Runtime {
  backend: Arc<dyn Backend>,
  device: String,
}

impl fmt::Debug for Runtime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Runtime")
      .field("backend", &self.backend.name())
      .field("device", &self.device)
      .finish()
  }
}

impl Runtime {
  /// 探测编译进来的推理后端
  #[cfg(feature = "onnxruntime")]
  pub fn detect(preferred_device: &str) -> Result<Self, EngineError> {
    Self::with_backend(Arc::new(OrtBackend::new()), preferred_device)
  }

  /// 探测编译进来的推理后端
  #[cfg(not(feature = "onnxruntime"))]
  pub fn detect(preferred_device: &str) -> Result<Self, EngineError> {
    let _ = preferred_device;
    Err(EngineError::Unavailable(
      "未启用任何推理后端, 请启用 onnxruntime 特性构建".to_string(),
    ))
  }

  pub fn with_backend(
    backend: Arc<dyn Backend>,
    preferred_device: &str,
  ) -> Result<Self, EngineError> {
    let available = backend.available_devices();
    let device = select_device(preferred_device, &available)?;
    info!(
      "推理引擎初始化: 后端 {}, 可用设备 {:?}, 选用 {}",
      backend.name(),
      available,
      device
    );
    Ok(Self { backend, device })
  }

  pub fn device(&self) -> &str {
    &self.device
  }

  pub fn backend_name(&self) -> &str {
    self.backend.name()
  }

  pub fn available_devices(&self) -> Vec<String> {
    self.backend.available_devices()
  }

  pub fn compile(&self, definition: &ModelDefinition) -> Result<Arc<dyn CompiledModel>, EngineError> {
    if !self.backend.supports(definition.format) {
      return Err(EngineError::UnsupportedFormat {
        backend: self.backend.name().to_string(),
        format: definition.format,
      });
    }
    self.backend.compile(definition, &self.device)
  }
}
