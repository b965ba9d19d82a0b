// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/server/inference.rs - 推理接口
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

use axum::{
  Json,
  extract::{Multipart, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{ApiError, SharedState, run_blocking};
use crate::{
  codec,
  detection::{BoundingBox, DetectionResult},
  filter::DetectionFilter,
  inference::{InferenceError, InferenceStatistics},
};

#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
  /// Base64 编码的 JPEG/PNG/BMP
  pub image: String,
  pub confidence_threshold: Option<f32>,
  pub enabled_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct BatchInferenceRequest {
  pub images: Vec<String>,
  pub confidence_threshold: Option<f32>,
  pub enabled_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct FileInferenceQuery {
  pub confidence_threshold: Option<f32>,
  /// 逗号分隔的类别名
  pub enabled_classes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
  pub bounding_boxes: Vec<BoundingBox>,
  pub inference_time_ms: f64,
  /// (height, width)
  pub frame_shape: (u32, u32),
  /// (height, width)
  pub model_input_shape: (u32, u32),
  pub detection_count: usize,
}

impl From<DetectionResult> for InferenceResponse {
  fn from(result: DetectionResult) -> Self {
    Self {
      detection_count: result.boxes.len(),
      bounding_boxes: result.boxes,
      inference_time_ms: result.inference_time_ms,
      frame_shape: result.frame_shape,
      model_input_shape: result.model_input_shape,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInferenceResponse {
  pub results: Vec<InferenceResponse>,
  pub total_inference_time_ms: f64,
  pub average_inference_time_ms: f64,
}

/// 请求级过滤条件基于共享配置的副本
fn request_filter(
  state: &SharedState,
  confidence_threshold: Option<f32>,
  enabled_classes: Option<Vec<String>>,
) -> Result<DetectionFilter, ApiError> {
  Ok(
    state
      .logic
      .config()
      .with_overrides(confidence_threshold, enabled_classes)?,
  )
}

/// 解析逗号分隔的类别名，没有任何类别时视为未指定
fn class_list(raw: &str) -> Option<Vec<String>> {
  let classes: Vec<String> = raw
    .split(',')
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .map(str::to_string)
    .collect();
  (!classes.is_empty()).then_some(classes)
}

fn ensure_loaded(state: &SharedState) -> Result<(), ApiError> {
  if state.engine.loader().is_loaded() {
    Ok(())
  } else {
    Err(InferenceError::ModelNotLoaded.into())
  }
}

pub async fn infer(
  State(state): State<SharedState>,
  Json(request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ApiError> {
  ensure_loaded(&state)?;
  let filter = request_filter(&state, request.confidence_threshold, request.enabled_classes)?;

  let engine = state.engine.clone();
  let result = run_blocking(move || {
    let frame = codec::decode_base64(&request.image)?;
    Ok(engine.infer(&frame)?)
  })
  .await?;

  Ok(Json(filter.apply(&result).into()))
}

pub async fn infer_batch(
  State(state): State<SharedState>,
  Json(request): Json<BatchInferenceRequest>,
) -> Result<Json<BatchInferenceResponse>, ApiError> {
  ensure_loaded(&state)?;
  let filter = request_filter(&state, request.confidence_threshold, request.enabled_classes)?;

  let engine = state.engine.clone();
  let results = run_blocking(move || {
    let frames = request
      .images
      .iter()
      .map(|image| codec::decode_base64(image))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(engine.infer_batch(&frames)?)
  })
  .await?;

  let results: Vec<InferenceResponse> = results
    .iter()
    .map(|result| filter.apply(result).into())
    .collect();
  let total: f64 = results.iter().map(|r| r.inference_time_ms).sum();
  let average = if results.is_empty() {
    0.0
  } else {
    total / results.len() as f64
  };
  debug!("批量推理完成: {} 张图像, 总耗时 {:.2} ms", results.len(), total);

  Ok(Json(BatchInferenceResponse {
    results,
    total_inference_time_ms: total,
    average_inference_time_ms: average,
  }))
}

pub async fn infer_file(
  State(state): State<SharedState>,
  Query(query): Query<FileInferenceQuery>,
  mut multipart: Multipart,
) -> Result<Json<InferenceResponse>, ApiError> {
  ensure_loaded(&state)?;
  let enabled_classes = query.enabled_classes.as_deref().and_then(class_list);
  let filter = request_filter(&state, query.confidence_threshold, enabled_classes)?;

  let mut bytes = None;
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| ApiError::bad_request(format!("表单解析失败: {}", e)))?
  {
    if field.name() == Some("file") {
      bytes = Some(
        field
          .bytes()
          .await
          .map_err(|e| ApiError::bad_request(format!("文件读取失败: {}", e)))?,
      );
      break;
    }
  }
  let bytes = bytes.ok_or_else(|| ApiError::bad_request("缺少 file 字段"))?;

  let engine = state.engine.clone();
  let result = run_blocking(move || {
    let frame = codec::decode(&bytes)?;
    Ok(engine.infer(&frame)?)
  })
  .await?;

  Ok(Json(filter.apply(&result).into()))
}

pub async fn statistics(State(state): State<SharedState>) -> Json<InferenceStatistics> {
  Json(state.engine.get_statistics())
}

pub async fn reset_statistics(State(state): State<SharedState>) -> Json<Value> {
  state.engine.reset_statistics();
  Json(json!({ "message": "Statistics reset" }))
}
