// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// tests/common/mod.rs - 集成测试公用的模拟后端
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

#![allow(dead_code)]

use std::{
  fs,
  path::{Path, PathBuf},
  sync::{
    Arc, Barrier,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, SystemTime},
};

use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};

use shanan_edge::{
  frame::Tensor,
  model::{LoadedModel, ModelFormat},
  runtime::{Backend, CompiledModel, EngineError, ModelDefinition, Runtime},
};

pub const INPUT_SIZE: usize = 64;
pub const CLASS_COUNT: usize = 80;

/// 两个栅栏：模型进入 `run` 后等待 `entered`，再等待 `release` 才返回
pub struct Gate {
  pub entered: Barrier,
  pub release: Barrier,
}

impl Gate {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      entered: Barrier::new(2),
      release: Barrier::new(2),
    })
  }
}

/// 模拟模型：文件内容 `class=N` 表示每帧输出一个类别为 N 的目标，
/// 追加 ` gated` 时每次推理在后端的 [`Gate`] 处停留
pub struct MockModel {
  pub class_id: usize,
  gate: Option<Arc<Gate>>,
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
  runs: AtomicUsize,
}

impl MockModel {
  pub fn runs(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }
}

impl CompiledModel for MockModel {
  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn run(&self, input: &Tensor) -> Result<Tensor, EngineError> {
    if input.shape() != self.input_shape.as_slice() {
      return Err(EngineError::Execution(format!(
        "输入形状 {:?} 与模型 {:?} 不一致",
        input.shape(),
        self.input_shape
      )));
    }
    self.runs.fetch_add(1, Ordering::SeqCst);
    if let Some(gate) = &self.gate {
      gate.entered.wait();
      gate.release.wait();
    }

    // 归一化坐标，输入 64x64 上为 (22, 22)-(42, 42)
    let side = INPUT_SIZE as f32;
    let mut row = vec![0.0; 4 + CLASS_COUNT];
    row[..4].copy_from_slice(&[0.5, 0.5, 20.0 / side, 20.0 / side]);
    row[4 + self.class_id] = 0.9;
    Ok(Tensor::new(self.output_shape.clone(), row)?)
  }
}

/// 记录编译次数的模拟后端，文件内容为 `panic` 时编译直接 panic
#[derive(Default)]
pub struct MockBackend {
  compiles: AtomicUsize,
  gate: Option<Arc<Gate>>,
}

impl MockBackend {
  pub fn with_gate(gate: Arc<Gate>) -> Self {
    Self {
      compiles: AtomicUsize::new(0),
      gate: Some(gate),
    }
  }

  pub fn compiles(&self) -> usize {
    self.compiles.load(Ordering::SeqCst)
  }
}

impl Backend for MockBackend {
  fn name(&self) -> &str {
    "mock"
  }

  fn available_devices(&self) -> Vec<String> {
    vec!["CPU".to_string()]
  }

  fn supports(&self, _format: ModelFormat) -> bool {
    true
  }

  fn compile(
    &self,
    definition: &ModelDefinition,
    _device: &str,
  ) -> Result<Arc<dyn CompiledModel>, EngineError> {
    self.compiles.fetch_add(1, Ordering::SeqCst);

    let content = fs::read_to_string(&definition.primary)
      .map_err(|e| EngineError::Compile(e.to_string()))?;
    if content.trim() == "panic" {
      panic!("模拟后端编译崩溃");
    }

    let mut tokens = content.split_whitespace();
    let class_id = tokens
      .next()
      .unwrap_or_default()
      .strip_prefix("class=")
      .and_then(|n| n.parse::<usize>().ok())
      .filter(|&n| n < CLASS_COUNT)
      .ok_or_else(|| EngineError::Compile(format!("无法解析模型: {}", content.trim())))?;

    let gated = tokens.any(|t| t == "gated");

    Ok(Arc::new(MockModel {
      class_id,
      gate: if gated { self.gate.clone() } else { None },
      input_shape: vec![1, 3, INPUT_SIZE, INPUT_SIZE],
      output_shape: vec![1, 1, 4 + CLASS_COUNT],
      runs: AtomicUsize::new(0),
    }))
  }
}

pub fn mock_runtime() -> (Arc<MockBackend>, Runtime) {
  let backend = Arc::new(MockBackend::default());
  let runtime = Runtime::with_backend(backend.clone(), "AUTO").unwrap();
  (backend, runtime)
}

pub fn gated_runtime(gate: Arc<Gate>) -> Runtime {
  Runtime::with_backend(Arc::new(MockBackend::with_gate(gate)), "AUTO").unwrap()
}

pub fn model_content(class_id: usize) -> String {
  format!("class={}", class_id)
}

pub fn write_model(dir: &Path, file_name: &str, class_id: usize) -> PathBuf {
  let path = dir.join(file_name);
  fs::write(&path, model_content(class_id)).unwrap();
  path
}

/// 相对 UNIX 纪元的秒数
pub fn set_mtime(path: &Path, secs: u64) {
  let file = fs::File::options().write(true).open(path).unwrap();
  file
    .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    .unwrap();
}

pub fn sha256_hex(content: &str) -> String {
  format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// 当前模型输出的类别
pub fn served_class(model: &LoadedModel) -> usize {
  let input = Tensor::zeros(vec![1, 3, INPUT_SIZE, INPUT_SIZE]);
  let output = model.compiled.run(&input).unwrap();
  let scores = &output.data()[4..];
  scores
    .iter()
    .enumerate()
    .max_by(|a, b| a.1.total_cmp(b.1))
    .map(|(i, _)| i)
    .unwrap()
}

pub fn gray_frame(width: u32, height: u32) -> RgbImage {
  RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))
}

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let start = std::time::Instant::now();
  while start.elapsed() < timeout {
    if condition() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(20));
  }
  condition()
}
