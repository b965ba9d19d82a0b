// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use serde::{Deserialize, Serialize};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 检测框，像素坐标 [x1, y1, x2, y2]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  /// 左
  pub x1: f32,
  /// 上
  pub y1: f32,
  /// 右
  pub x2: f32,
  /// 下
  pub y2: f32,
  /// 置信度
  pub confidence: f32,
  /// 类别索引
  pub class_id: u32,
  /// 类别名称
  pub class_name: String,
}

impl BoundingBox {
  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }
}

/// 单帧检测结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
  pub boxes: Vec<BoundingBox>,
  pub inference_time_ms: f64,
  /// 原始帧尺寸 (height, width)
  pub frame_shape: (u32, u32),
  /// 模型输入尺寸 (height, width)
  pub model_input_shape: (u32, u32),
}

impl DetectionResult {
  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  /// 用新的检测框列表构造结果，保留其余元数据
  pub fn with_boxes(&self, boxes: Vec<BoundingBox>) -> Self {
    Self {
      boxes,
      inference_time_ms: self.inference_time_ms,
      frame_shape: self.frame_shape,
      model_input_shape: self.model_input_shape,
    }
  }
}

/// 根据类别索引获取类别名称，越界时返回 `class_{id}`
pub fn class_name_of(names: &[String], class_id: u32) -> String {
  names
    .get(class_id as usize)
    .cloned()
    .unwrap_or_else(|| format!("class_{}", class_id))
}
