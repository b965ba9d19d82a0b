// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/runtime/ort_backend.rs - ONNX Runtime 推理后端
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

use std::sync::{Arc, Mutex};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor as OrtTensor,
};
use tracing::{debug, info};

use super::{Backend, CompiledModel, DEVICE_CPU, EngineError, ModelDefinition};
use crate::{frame::Tensor, model::ModelFormat};

/// 只支持 `.onnx` 单文件模型，运行于 CPU
#[derive(Debug, Default)]
pub struct OrtBackend;

impl OrtBackend {
  pub fn new() -> Self {
    Self
  }
}

impl Backend for OrtBackend {
  fn name(&self) -> &str {
    "onnxruntime"
  }

  fn available_devices(&self) -> Vec<String> {
    vec![DEVICE_CPU.to_string()]
  }

  fn supports(&self, format: ModelFormat) -> bool {
    format == ModelFormat::Interchange
  }

  fn compile(
    &self,
    definition: &ModelDefinition,
    device: &str,
  ) -> Result<Arc<dyn CompiledModel>, EngineError> {
    info!("编译 ONNX 模型: {} ({})", definition.primary.display(), device);

    let session = Session::builder()
      .map_err(|e| EngineError::Compile(format!("创建会话失败: {}", e)))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| EngineError::Compile(format!("设置优化等级失败: {}", e)))?
      .commit_from_file(&definition.primary)
      .map_err(|e| EngineError::Compile(format!("加载模型失败: {}", e)))?;

    let input = session
      .inputs
      .first()
      .ok_or_else(|| EngineError::Compile("模型没有输入".to_string()))?;
    let output = session
      .outputs
      .first()
      .ok_or_else(|| EngineError::Compile("模型没有输出".to_string()))?;

    let input_name = input.name.clone();
    let output_name = output.name.clone();
    let input_shape = dims(input.input_type.tensor_shape().map(|s| s.to_vec()));
    let output_shape = dims(output.output_type.tensor_shape().map(|s| s.to_vec()));

    debug!(
      "模型输入 {} {:?}, 输出 {} {:?}",
      input_name, input_shape, output_name, output_shape
    );

    Ok(Arc::new(OrtModel {
      session: Mutex::new(session),
      input_name,
      output_name,
      input_shape,
      output_shape,
    }))
  }
}

/// 动态维度（负数）记为 0
fn dims(shape: Option<Vec<i64>>) -> Vec<usize> {
  shape
    .unwrap_or_default()
    .into_iter()
    .map(|d| usize::try_from(d).unwrap_or(0))
    .collect()
}

/// 一个已编译模型只持有一个会话，同一模型上的推理按会话锁串行执行。
/// 会话内部的算子并行由 onnxruntime 线程池负责，
/// 多个请求之间只在锁外的预处理与后处理阶段并发。
struct OrtModel {
  // ort 的 run 需要 &mut Session
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
}

impl CompiledModel for OrtModel {
  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn run(&self, input: &Tensor) -> Result<Tensor, EngineError> {
    let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let value = OrtTensor::from_array((shape, input.data().to_vec()))
      .map_err(|e| EngineError::Execution(format!("创建输入张量失败: {}", e)))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| EngineError::Execution("会话锁已损坏".to_string()))?;

    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => value])
      .map_err(|e| EngineError::Execution(format!("推理失败: {}", e)))?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| EngineError::Execution(format!("找不到输出 {}", self.output_name)))?;
    let (shape, data) = output
      .try_extract_tensor::<f32>()
      .map_err(|e| EngineError::Execution(format!("读取输出失败: {}", e)))?;

    let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok(Tensor::new(shape, data.to_vec())?)
  }
}
