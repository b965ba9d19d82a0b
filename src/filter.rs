// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/filter.rs - 检测结果过滤与分类统计
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
  collections::{BTreeMap, BTreeSet},
  sync::{PoisonError, RwLock},
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::detection::{BoundingBox, DetectionResult};

pub const PERSON_CLASS_ID: u32 = 0;
/// bicycle, car, motorcycle, bus, truck
pub const VEHICLE_CLASS_IDS: [u32; 5] = [1, 2, 3, 5, 7];

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
  #[error("置信度阈值必须在 0.0 到 1.0 之间, 实际为 {0}")]
  InvalidConfidence(f32),
  #[error("面积范围无效: 最小 {min}, 最大 {max}")]
  InvalidArea { min: f32, max: f32 },
}

impl FilterError {
  pub fn is_caller_error(&self) -> bool {
    true
  }
}

/// 过滤条件
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionFilter {
  /// None 表示不限制类别
  pub enabled_classes: Option<BTreeSet<String>>,
  pub min_confidence: f32,
  pub min_area: f32,
  pub max_area: f32,
}

impl Default for DetectionFilter {
  fn default() -> Self {
    Self {
      enabled_classes: None,
      min_confidence: 0.5,
      min_area: 0.0,
      max_area: f32::INFINITY,
    }
  }
}

fn check_confidence(threshold: f32) -> Result<f32, FilterError> {
  if (0.0..=1.0).contains(&threshold) {
    Ok(threshold)
  } else {
    Err(FilterError::InvalidConfidence(threshold))
  }
}

fn check_area(min: f32, max: f32) -> Result<(f32, f32), FilterError> {
  if min >= 0.0 && max >= min {
    Ok((min, max))
  } else {
    Err(FilterError::InvalidArea { min, max })
  }
}

impl DetectionFilter {
  pub fn validate(&self) -> Result<(), FilterError> {
    check_confidence(self.min_confidence)?;
    check_area(self.min_area, self.max_area)?;
    Ok(())
  }

  pub fn accepts(&self, b: &BoundingBox) -> bool {
    if b.confidence < self.min_confidence {
      return false;
    }
    if let Some(classes) = &self.enabled_classes {
      if !classes.contains(&b.class_name) {
        return false;
      }
    }
    let area = b.area();
    area >= self.min_area && area <= self.max_area
  }

  /// 返回新的结果，不修改输入
  pub fn apply(&self, result: &DetectionResult) -> DetectionResult {
    result.with_boxes(
      result
        .boxes
        .iter()
        .filter(|b| self.accepts(b))
        .cloned()
        .collect(),
    )
  }

  /// 单次请求使用的副本
  pub fn with_overrides(
    &self,
    confidence_threshold: Option<f32>,
    enabled_classes: Option<Vec<String>>,
  ) -> Result<Self, FilterError> {
    let mut filter = self.clone();
    if let Some(threshold) = confidence_threshold {
      filter.min_confidence = check_confidence(threshold)?;
    }
    if let Some(classes) = enabled_classes {
      filter.enabled_classes = Some(classes.into_iter().collect());
    }
    Ok(filter)
  }
}

/// 进程内共享的过滤配置
///
/// 读多写少，更新失败时保持原配置。
#[derive(Debug, Default)]
pub struct DetectionLogic {
  filter: RwLock<DetectionFilter>,
}

impl DetectionLogic {
  pub fn new(filter: DetectionFilter) -> Result<Self, FilterError> {
    filter.validate()?;
    Ok(Self {
      filter: RwLock::new(filter),
    })
  }

  /// 当前配置的副本
  pub fn config(&self) -> DetectionFilter {
    self
      .filter
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn filter(&self, result: &DetectionResult) -> DetectionResult {
    self
      .filter
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .apply(result)
  }

  fn update<T>(&self, f: impl FnOnce(&mut DetectionFilter) -> T) -> T {
    let mut filter = self.filter.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut filter)
  }

  pub fn set_confidence_threshold(&self, threshold: f32) -> Result<(), FilterError> {
    let threshold = check_confidence(threshold)?;
    self.update(|f| f.min_confidence = threshold);
    info!("置信度阈值已更新: {}", threshold);
    Ok(())
  }

  /// None 清除类别限制
  pub fn set_enabled_classes<I>(&self, classes: Option<I>)
  where
    I: IntoIterator<Item = String>,
  {
    let classes: Option<BTreeSet<String>> = classes.map(|c| c.into_iter().collect());
    match &classes {
      Some(c) => info!("启用类别已更新: {:?}", c),
      None => info!("启用类别已更新: 全部"),
    }
    self.update(|f| f.enabled_classes = classes);
  }

  pub fn set_area_bounds(&self, min_area: f32, max_area: f32) -> Result<(), FilterError> {
    let (min, max) = check_area(min_area, max_area)?;
    self.update(|f| {
      f.min_area = min;
      f.max_area = max;
    });
    info!("面积范围已更新: [{}, {}]", min, max);
    Ok(())
  }

  /// 整体替换配置
  pub fn replace(&self, filter: DetectionFilter) -> Result<(), FilterError> {
    filter.validate()?;
    self.update(|f| *f = filter);
    info!("过滤配置已更新");
    Ok(())
  }
}

pub fn detect_persons(result: &DetectionResult) -> Vec<BoundingBox> {
  result
    .boxes
    .iter()
    .filter(|b| b.class_id == PERSON_CLASS_ID)
    .cloned()
    .collect()
}

pub fn detect_vehicles(result: &DetectionResult) -> Vec<BoundingBox> {
  result
    .boxes
    .iter()
    .filter(|b| VEHICLE_CLASS_IDS.contains(&b.class_id))
    .cloned()
    .collect()
}

pub fn detect_classes(result: &DetectionResult, class_names: &[&str]) -> Vec<BoundingBox> {
  result
    .boxes
    .iter()
    .filter(|b| class_names.contains(&b.class_name.as_str()))
    .cloned()
    .collect()
}

pub fn has_person(result: &DetectionResult) -> bool {
  result.boxes.iter().any(|b| b.class_id == PERSON_CLASS_ID)
}

pub fn has_vehicle(result: &DetectionResult) -> bool {
  result
    .boxes
    .iter()
    .any(|b| VEHICLE_CLASS_IDS.contains(&b.class_id))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassSummary {
  pub count: usize,
  pub max_confidence: f32,
  pub avg_confidence: f32,
}

/// 按类别名汇总数量与置信度
pub fn summary(result: &DetectionResult) -> BTreeMap<String, ClassSummary> {
  let mut summary: BTreeMap<String, ClassSummary> = BTreeMap::new();
  for b in &result.boxes {
    let entry = summary.entry(b.class_name.clone()).or_default();
    entry.count += 1;
    entry.max_confidence = entry.max_confidence.max(b.confidence);
    entry.avg_confidence += (b.confidence - entry.avg_confidence) / entry.count as f32;
  }
  summary
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::COCO_CLASSES;

  fn bbox(class_id: u32, confidence: f32, size: f32) -> BoundingBox {
    BoundingBox {
      x1: 0.0,
      y1: 0.0,
      x2: size,
      y2: size,
      confidence,
      class_id,
      class_name: COCO_CLASSES[class_id as usize].to_string(),
    }
  }

  fn result(boxes: Vec<BoundingBox>) -> DetectionResult {
    DetectionResult {
      boxes,
      inference_time_ms: 12.5,
      frame_shape: (480, 640),
      model_input_shape: (640, 640),
    }
  }

  #[test]
  fn keeps_boxes_above_confidence() {
    let input = result(
      [0.9, 0.8, 0.7, 0.3]
        .iter()
        .map(|&c| bbox(0, c, 10.0))
        .collect(),
    );
    let logic = DetectionLogic::new(DetectionFilter::default()).unwrap();
    let filtered = logic.filter(&input);

    assert_eq!(filtered.len(), 3);
    assert_eq!(filtered.boxes, input.boxes[..3].to_vec());
    assert_eq!(filtered.inference_time_ms, 12.5);
    assert_eq!(input.len(), 4);
  }

  #[test]
  fn out_of_range_threshold_is_rejected() {
    let logic = DetectionLogic::default();
    logic.set_confidence_threshold(0.6).unwrap();

    for bad in [1.5, -0.1, f32::NAN] {
      assert!(logic.set_confidence_threshold(bad).is_err());
      assert_eq!(logic.config().min_confidence, 0.6);
    }
    assert!(logic.set_confidence_threshold(1.0).is_ok());
    assert!(logic.set_confidence_threshold(0.0).is_ok());
  }

  #[test]
  fn confidence_property_holds() {
    let boxes: Vec<_> = (0..50)
      .map(|i| bbox(i % 8, (i as f32 * 0.37) % 1.0, 5.0 + i as f32))
      .collect();
    let input = result(boxes);

    for threshold in [0.0, 0.25, 0.5, 0.75, 1.0] {
      let filter = DetectionFilter {
        min_confidence: threshold,
        ..Default::default()
      };
      let filtered = filter.apply(&input);
      assert!(filtered.boxes.iter().all(|b| b.confidence >= threshold));
      for b in &input.boxes {
        if !filtered.boxes.contains(b) {
          assert!(b.confidence < threshold);
        }
      }
    }
  }

  #[test]
  fn class_and_area_restrictions() {
    let logic = DetectionLogic::default();
    let input = result(vec![
      bbox(0, 0.9, 10.0),
      bbox(2, 0.9, 10.0),
      bbox(2, 0.9, 100.0),
    ]);

    logic.set_enabled_classes(Some(vec!["car".to_string()]));
    assert_eq!(logic.filter(&input).len(), 2);

    logic.set_area_bounds(50.0, 1000.0).unwrap();
    let filtered = logic.filter(&input);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.boxes[0].x2, 10.0);

    logic.set_enabled_classes(None::<Vec<String>>);
    assert_eq!(logic.filter(&input).len(), 2);

    assert_eq!(
      logic.set_area_bounds(10.0, 5.0),
      Err(FilterError::InvalidArea { min: 10.0, max: 5.0 })
    );
    assert_eq!(logic.config().max_area, 1000.0);
  }

  #[test]
  fn overrides_do_not_touch_shared_config() {
    let logic = DetectionLogic::default();
    let input = result(vec![bbox(0, 0.9, 10.0), bbox(2, 0.4, 10.0)]);

    let custom = logic
      .config()
      .with_overrides(Some(0.3), Some(vec!["car".to_string()]))
      .unwrap();
    let filtered = custom.apply(&input);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.boxes[0].class_name, "car");

    assert_eq!(logic.config(), DetectionFilter::default());
    assert!(logic.config().with_overrides(Some(2.0), None).is_err());
  }

  #[test]
  fn category_helpers() {
    let input = result(vec![
      bbox(0, 0.9, 10.0),
      bbox(0, 0.6, 10.0),
      bbox(1, 0.8, 10.0),
      bbox(7, 0.7, 10.0),
      bbox(16, 0.9, 10.0),
    ]);

    assert_eq!(detect_persons(&input).len(), 2);
    assert_eq!(detect_vehicles(&input).len(), 2);
    assert_eq!(detect_classes(&input, &["dog", "truck"]).len(), 2);
    assert!(has_person(&input));
    assert!(has_vehicle(&input));
    assert!(!has_vehicle(&result(vec![bbox(16, 0.9, 10.0)])));

    let summary = summary(&input);
    let person = &summary["person"];
    assert_eq!(person.count, 2);
    assert!((person.max_confidence - 0.9).abs() < 1e-6);
    assert!((person.avg_confidence - 0.75).abs() < 1e-6);
    assert_eq!(summary["dog"].count, 1);
  }
}
