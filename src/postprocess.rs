// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/postprocess.rs - YOLO 输出解析、坐标还原与 NMS
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
use tracing::debug;

use crate::{
  detection::{BoundingBox, COCO_CLASSES, class_name_of},
  frame::Tensor,
  geometry::{Letterbox, center_to_corners, nms},
};

/// 每行前 4 个值为 cx, cy, w, h
const BOX_ATTRIBUTES: usize = 4;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug, PartialEq)]
pub enum PostprocessError {
  #[error("无法识别的模型输出形状: {0:?}")]
  UnexpectedShape(Vec<usize>),
  #[error("批次索引 {index} 越界，输出批次大小为 {batch}")]
  BatchIndex { index: usize, batch: usize },
}

/// 输出张量的排布
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
  /// `[N, 4 + C]`
  RowMajor { rows: usize, attributes: usize },
  /// `[4 + C, N]`
  ChannelMajor { rows: usize, attributes: usize },
}

impl Layout {
  fn rows(&self) -> usize {
    match *self {
      Layout::RowMajor { rows, .. } | Layout::ChannelMajor { rows, .. } => rows,
    }
  }

  fn attributes(&self) -> usize {
    match *self {
      Layout::RowMajor { attributes, .. } | Layout::ChannelMajor { attributes, .. } => attributes,
    }
  }

  fn value(&self, data: &[f32], row: usize, attribute: usize) -> f32 {
    match *self {
      Layout::RowMajor { attributes, .. } => data[row * attributes + attribute],
      Layout::ChannelMajor { rows, .. } => data[attribute * rows + row],
    }
  }
}

/// 把原始模型输出转换为原图坐标系下的检测框
#[derive(Debug, Clone)]
pub struct Postprocessor {
  class_names: Vec<String>,
}

impl Default for Postprocessor {
  fn default() -> Self {
    Self::new(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
  }
}

impl Postprocessor {
  pub fn new(class_names: Vec<String>) -> Self {
    Self { class_names }
  }

  pub fn class_names(&self) -> &[String] {
    &self.class_names
  }

  /// 处理单帧输出（批次第 0 项）
  ///
  /// `original` 为原始帧 (height, width)。返回顺序为 NMS 保留顺序，即置信度降序。
  pub fn process(
    &self,
    output: &Tensor,
    letterbox: &Letterbox,
    original: (u32, u32),
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Vec<BoundingBox>, PostprocessError> {
    self.process_item(
      output,
      0,
      letterbox,
      original,
      confidence_threshold,
      nms_threshold,
    )
  }

  /// 处理批量输出中的第 `index` 项
  pub fn process_item(
    &self,
    output: &Tensor,
    index: usize,
    letterbox: &Letterbox,
    original: (u32, u32),
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Vec<BoundingBox>, PostprocessError> {
    let layout = self.detect_layout(output.shape())?;
    let data = if output.shape().len() == 2 {
      if index != 0 {
        return Err(PostprocessError::BatchIndex { index, batch: 1 });
      }
      output.data()
    } else {
      output
        .batch_item(index)
        .ok_or(PostprocessError::BatchIndex {
          index,
          batch: output.batch(),
        })?
    };

    let (original_h, original_w) = (original.0 as f32, original.1 as f32);
    let mut candidates = Vec::new();

    for row in 0..layout.rows() {
      // 取最高分类别
      let mut class_id = 0;
      let mut confidence = f32::NEG_INFINITY;
      for attribute in BOX_ATTRIBUTES..layout.attributes() {
        let score = layout.value(data, row, attribute);
        if score > confidence {
          confidence = score;
          class_id = attribute - BOX_ATTRIBUTES;
        }
      }

      if !(confidence >= confidence_threshold) {
        continue;
      }

      let [nx1, ny1, nx2, ny2] = center_to_corners(
        layout.value(data, row, 0),
        layout.value(data, row, 1),
        layout.value(data, row, 2),
        layout.value(data, row, 3),
      );

      let (x1, y1) = letterbox.to_frame(nx1, ny1);
      let (x2, y2) = letterbox.to_frame(nx2, ny2);

      let x1 = x1.clamp(0.0, original_w);
      let y1 = y1.clamp(0.0, original_h);
      let x2 = x2.clamp(0.0, original_w);
      let y2 = y2.clamp(0.0, original_h);

      // 裁剪后退化的框直接丢弃
      if !(x2 > x1 && y2 > y1) {
        continue;
      }

      candidates.push(BoundingBox {
        x1,
        y1,
        x2,
        y2,
        confidence,
        class_id: class_id as u32,
        class_name: class_name_of(&self.class_names, class_id as u32),
      });
    }

    let total = candidates.len();
    let kept = nms(candidates, nms_threshold);
    debug!("后处理: {} 个候选框, NMS 后保留 {} 个", total, kept.len());

    Ok(kept)
  }

  /// 识别 `[.., N, 4+C]` 与 `[.., 4+C, N]` 两种排布
  ///
  /// 优先按已配置的类别数精确匹配，否则取较小的一维作为属性维。
  fn detect_layout(&self, shape: &[usize]) -> Result<Layout, PostprocessError> {
    if shape.len() < 2 || shape.len() > 3 {
      return Err(PostprocessError::UnexpectedShape(shape.to_vec()));
    }

    let a = shape[shape.len() - 2];
    let b = shape[shape.len() - 1];
    let expected = BOX_ATTRIBUTES + self.class_names.len();

    let layout = if b == expected {
      Layout::RowMajor {
        rows: a,
        attributes: b,
      }
    } else if a == expected {
      Layout::ChannelMajor {
        rows: b,
        attributes: a,
      }
    } else if b <= a {
      Layout::RowMajor {
        rows: a,
        attributes: b,
      }
    } else {
      Layout::ChannelMajor {
        rows: b,
        attributes: a,
      }
    };

    if layout.attributes() <= BOX_ATTRIBUTES {
      return Err(PostprocessError::UnexpectedShape(shape.to_vec()));
    }

    Ok(layout)
  }
}
