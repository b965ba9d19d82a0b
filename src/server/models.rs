// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/server/models.rs - 模型管理与过滤配置接口
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

use std::str::FromStr;

use axum::{
  Json,
  extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, SharedState, run_blocking};
use crate::{
  filter::DetectionFilter,
  model::{ModelFormat, ModelInfo, ModelState, ModelVersion},
};

#[derive(Debug, Serialize)]
pub struct CurrentModel {
  pub loaded: bool,
  pub state: ModelState,
  pub monitoring: bool,
  pub backend: String,
  pub device: String,
  pub last_failure: Option<String>,
  pub model: Option<ModelInfo>,
}

pub async fn current(State(state): State<SharedState>) -> Json<CurrentModel> {
  let loader = state.engine.loader();
  let info = loader.current_info();
  Json(CurrentModel {
    loaded: info.is_some(),
    state: loader.state(),
    monitoring: loader.is_monitoring(),
    backend: loader.runtime().backend_name().to_string(),
    device: loader.runtime().device().to_string(),
    last_failure: loader.last_failure(),
    model: info.map(|info| (*info).clone()),
  })
}

pub async fn versions(
  State(state): State<SharedState>,
  Path(name): Path<String>,
) -> Result<Json<Vec<ModelVersion>>, ApiError> {
  let loader = state.engine.loader().clone();
  let versions = run_blocking(move || Ok(loader.list_versions(&name)?)).await?;
  Ok(Json(versions))
}

/// 省略 name 时按当前模型重新加载
#[derive(Debug, Default, Deserialize)]
pub struct ReloadRequest {
  pub name: Option<String>,
  pub format: Option<String>,
  pub version: Option<String>,
}

pub async fn reload(
  State(state): State<SharedState>,
  request: Option<Json<ReloadRequest>>,
) -> Result<Json<ModelInfo>, ApiError> {
  let request = request.map(|Json(r)| r).unwrap_or_default();
  let loader = state.engine.loader().clone();

  let info = run_blocking(move || {
    let info = match request.name {
      None => loader.reload()?,
      Some(name) => {
        let format = match request.format.as_deref() {
          Some(format) => ModelFormat::from_str(format)?,
          None => loader
            .current_info()
            .map(|info| info.format)
            .unwrap_or(ModelFormat::NativeIr),
        };
        loader.load(&name, format, request.version.as_deref())?
      }
    };
    Ok(info)
  })
  .await?;

  info!("手动重新加载模型完成: {} 版本 {}", info.name, info.version);
  state.ensure_monitoring();
  Ok(Json((*info).clone()))
}

/// 过滤配置的 JSON 表示，`max_area` 为空表示不限制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterView {
  pub min_confidence: f32,
  pub enabled_classes: Option<Vec<String>>,
  pub min_area: f32,
  pub max_area: Option<f32>,
}

impl Default for FilterView {
  fn default() -> Self {
    Self::from(&DetectionFilter::default())
  }
}

impl From<&DetectionFilter> for FilterView {
  fn from(filter: &DetectionFilter) -> Self {
    Self {
      min_confidence: filter.min_confidence,
      enabled_classes: filter
        .enabled_classes
        .as_ref()
        .map(|c| c.iter().cloned().collect()),
      min_area: filter.min_area,
      max_area: filter.max_area.is_finite().then_some(filter.max_area),
    }
  }
}

impl From<FilterView> for DetectionFilter {
  fn from(view: FilterView) -> Self {
    Self {
      enabled_classes: view.enabled_classes.map(|c| c.into_iter().collect()),
      min_confidence: view.min_confidence,
      min_area: view.min_area,
      max_area: view.max_area.unwrap_or(f32::INFINITY),
    }
  }
}

pub async fn get_filter(State(state): State<SharedState>) -> Json<FilterView> {
  Json(FilterView::from(&state.logic.config()))
}

/// 整体替换过滤配置，未给出的字段取默认值
pub async fn put_filter(
  State(state): State<SharedState>,
  Json(view): Json<FilterView>,
) -> Result<Json<FilterView>, ApiError> {
  state.logic.replace(view.into())?;
  Ok(Json(FilterView::from(&state.logic.config())))
}
