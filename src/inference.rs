// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/inference.rs - 推理流水线与统计
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
  sync::{Arc, Mutex, PoisonError},
  time::Instant,
};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  detection::{COCO_CLASSES, DetectionResult},
  frame::ChannelOrder,
  model::{ModelInfo, ModelLoader},
  postprocess::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD, PostprocessError, Postprocessor,
  },
  preprocess::{DEFAULT_TARGET_SIZE, PreprocessError, Preprocessor},
  runtime::EngineError,
};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型尚未加载")]
  ModelNotLoaded,
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Engine(#[from] EngineError),
  #[error("后处理失败: {0}")]
  Postprocess(#[from] PostprocessError),
}

impl InferenceError {
  pub fn is_caller_error(&self) -> bool {
    match self {
      InferenceError::Preprocess(e) => e.is_caller_error(),
      _ => false,
    }
  }

  pub fn is_retryable(&self) -> bool {
    match self {
      InferenceError::ModelNotLoaded => true,
      InferenceError::Engine(e) => e.is_retryable(),
      _ => false,
    }
  }
}

/// 流水线参数
#[derive(Clone, Debug)]
pub struct InferenceOptions {
  /// (width, height)
  pub target_size: (u32, u32),
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub channel_order: ChannelOrder,
  pub class_names: Vec<String>,
}

impl Default for InferenceOptions {
  fn default() -> Self {
    Self {
      target_size: DEFAULT_TARGET_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      channel_order: ChannelOrder::Rgb,
      class_names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InferenceStatistics {
  pub total_inferences: u64,
  pub total_time_ms: f64,
  pub average_time_ms: f64,
}

#[derive(Default)]
struct Statistics {
  count: u64,
  total_ms: f64,
}

/// 推理引擎
///
/// 每次调用取一次模型快照，整个调用期间只使用该快照。
pub struct InferenceEngine {
  loader: Arc<ModelLoader>,
  preprocessor: Preprocessor,
  postprocessor: Postprocessor,
  confidence_threshold: f32,
  nms_threshold: f32,
  statistics: Mutex<Statistics>,
}

impl InferenceEngine {
  pub fn new(loader: Arc<ModelLoader>, options: InferenceOptions) -> Self {
    let (target_w, target_h) = options.target_size;

    // 新模型输入尺寸与预处理尺寸不一致时告警
    loader.subscribe(move |info: &ModelInfo| -> anyhow::Result<()> {
      info!("推理引擎切换到模型 {} 版本 {}", info.name, info.version);
      if let [_, _, h, w] = info.input_shape[..] {
        if h != 0 && w != 0 && (h, w) != (target_h as usize, target_w as usize) {
          warn!(
            "模型输入尺寸 {}x{} 与预处理尺寸 {}x{} 不一致",
            w, h, target_w, target_h
          );
        }
      }
      Ok(())
    });

    Self {
      loader,
      preprocessor: Preprocessor::new(options.target_size)
        .with_channel_order(options.channel_order),
      postprocessor: Postprocessor::new(options.class_names),
      confidence_threshold: options.confidence_threshold,
      nms_threshold: options.nms_threshold,
      statistics: Mutex::new(Statistics::default()),
    }
  }

  pub fn loader(&self) -> &Arc<ModelLoader> {
    &self.loader
  }

  pub fn class_names(&self) -> &[String] {
    self.postprocessor.class_names()
  }

  pub fn infer(&self, frame: &RgbImage) -> Result<DetectionResult, InferenceError> {
    let start = Instant::now();

    let model = self.loader.current().ok_or(InferenceError::ModelNotLoaded)?;

    let (frame_w, frame_h) = frame.dimensions();
    let (tensor, letterbox) = self.preprocessor.preprocess(frame)?;
    let output = model.compiled.run(&tensor)?;
    let boxes = self.postprocessor.process(
      &output,
      &letterbox,
      (frame_h, frame_w),
      self.confidence_threshold,
      self.nms_threshold,
    )?;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    self.record(elapsed_ms);

    debug!(
      "推理完成: 模型 {} 版本 {}, {} 个目标, 耗时 {:.2} ms",
      model.info.name,
      model.info.version,
      boxes.len(),
      elapsed_ms
    );

    let (target_w, target_h) = self.preprocessor.target_size();
    Ok(DetectionResult {
      boxes,
      inference_time_ms: elapsed_ms,
      frame_shape: (frame_h, frame_w),
      model_input_shape: (target_h, target_w),
    })
  }

  /// 逐帧顺序推理，任一帧失败即返回
  pub fn infer_batch(&self, frames: &[RgbImage]) -> Result<Vec<DetectionResult>, InferenceError> {
    if !self.loader.is_loaded() {
      return Err(InferenceError::ModelNotLoaded);
    }
    frames.iter().map(|frame| self.infer(frame)).collect()
  }

  fn record(&self, elapsed_ms: f64) {
    let mut stats = self.statistics.lock().unwrap_or_else(PoisonError::into_inner);
    stats.count += 1;
    stats.total_ms += elapsed_ms;
  }

  pub fn get_statistics(&self) -> InferenceStatistics {
    let stats = self.statistics.lock().unwrap_or_else(PoisonError::into_inner);
    InferenceStatistics {
      total_inferences: stats.count,
      total_time_ms: stats.total_ms,
      average_time_ms: if stats.count > 0 {
        stats.total_ms / stats.count as f64
      } else {
        0.0
      },
    }
  }

  pub fn reset_statistics(&self) {
    *self.statistics.lock().unwrap_or_else(PoisonError::into_inner) = Statistics::default();
    info!("推理统计已重置");
  }
}
