// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/geometry.rs - letterbox 变换、IoU 与 NMS
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

use crate::detection::BoundingBox;

/// YOLO 标准灰色填充值
pub const LETTERBOX_PAD_VALUE: u8 = 114;

/// 保持宽高比缩放并居中填充的仿射参数
///
/// 预处理记录该参数，后处理用它把模型坐标映射回原始帧。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: u32,
  pub pad_y: u32,
  /// 缩放后图像宽度
  pub new_width: u32,
  /// 缩放后图像高度
  pub new_height: u32,
  /// 模型输入宽度
  pub target_width: u32,
  /// 模型输入高度
  pub target_height: u32,
}

impl Letterbox {
  /// 计算把 `frame_w x frame_h` 放入 `target_w x target_h` 的 letterbox 参数，
  /// 任一尺寸为 0 时返回 None
  pub fn fit(frame_w: u32, frame_h: u32, target_w: u32, target_h: u32) -> Option<Self> {
    if frame_w == 0 || frame_h == 0 || target_w == 0 || target_h == 0 {
      return None;
    }

    let scale =
      (target_w as f32 / frame_w as f32).min(target_h as f32 / frame_h as f32);

    let new_width = ((frame_w as f32 * scale) as u32).clamp(1, target_w);
    let new_height = ((frame_h as f32 * scale) as u32).clamp(1, target_h);

    Some(Self {
      scale,
      pad_x: (target_w - new_width) / 2,
      pad_y: (target_h - new_height) / 2,
      new_width,
      new_height,
      target_width: target_w,
      target_height: target_h,
    })
  }

  /// 原始帧像素坐标 -> 归一化模型输入坐标
  pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x * self.scale + self.pad_x as f32) / self.target_width as f32,
      (y * self.scale + self.pad_y as f32) / self.target_height as f32,
    )
  }

  /// 归一化模型输入坐标 -> 原始帧像素坐标（未裁剪）
  pub fn to_frame(&self, nx: f32, ny: f32) -> (f32, f32) {
    (
      (nx * self.target_width as f32 - self.pad_x as f32) / self.scale,
      (ny * self.target_height as f32 - self.pad_y as f32) / self.scale,
    )
  }
}

/// 中心点格式 -> 角点格式
pub fn center_to_corners(cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
  [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// 计算两个边界框的 IoU，不相交或并集为 0 时返回 0
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x1.max(b.x1);
  let y1 = a.y1.max(b.y1);
  let x2 = a.x2.min(b.x2);
  let y2 = a.y2.min(b.y2);

  if x2 <= x1 || y2 <= y1 {
    return 0.0;
  }

  let intersection = (x2 - x1) * (y2 - y1);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心非极大值抑制（不区分类别）
///
/// 按置信度降序取出当前最高的框，删除与其 IoU 超过 `threshold` 的其余框，
/// 直到没有剩余。返回顺序即保留顺序。
pub fn nms(mut boxes: Vec<BoundingBox>, threshold: f32) -> Vec<BoundingBox> {
  // 按置信度降序排序
  boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
  let mut remaining = boxes.into_iter();

  while let Some(best) = remaining.next() {
    let rest: Vec<BoundingBox> = remaining
      .filter(|other| iou(&best, other) <= threshold)
      .collect();
    kept.push(best);
    remaining = rest.into_iter();
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> BoundingBox {
    BoundingBox {
      x1,
      y1,
      x2,
      y2,
      confidence,
      class_id: 0,
      class_name: "person".to_string(),
    }
  }

  #[test]
  fn letterbox_landscape_frame() {
    let lb = Letterbox::fit(1920, 1080, 640, 640).unwrap();
    assert!((lb.scale - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(lb.new_width, 640);
    assert_eq!(lb.new_height, 360);
    assert_eq!(lb.pad_x, 0);
    assert_eq!(lb.pad_y, 140);
  }

  #[test]
  fn letterbox_portrait_frame() {
    let lb = Letterbox::fit(480, 640, 640, 640).unwrap();
    assert_eq!(lb.new_width, 480);
    assert_eq!(lb.new_height, 640);
    assert_eq!(lb.pad_x, 80);
    assert_eq!(lb.pad_y, 0);
  }

  #[test]
  fn letterbox_rejects_empty_frame() {
    assert!(Letterbox::fit(0, 480, 640, 640).is_none());
    assert!(Letterbox::fit(640, 0, 640, 640).is_none());
  }

  #[test]
  fn letterbox_round_trip() {
    for &(fw, fh) in &[(1920, 1080), (640, 480), (333, 777), (64, 64), (1, 1000)] {
      let lb = Letterbox::fit(fw, fh, 640, 640).unwrap();
      for &(x, y) in &[(0.0, 0.0), (fw as f32 / 2.0, fh as f32 / 3.0), (fw as f32, fh as f32)] {
        let (nx, ny) = lb.to_model(x, y);
        let (bx, by) = lb.to_frame(nx, ny);
        let tolerance = 1e-3 * fw.max(fh) as f32;
        assert!((bx - x).abs() < tolerance, "{fw}x{fh}: {bx} vs {x}");
        assert!((by - y).abs() < tolerance, "{fw}x{fh}: {by} vs {y}");
      }
    }
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
    let b = bbox(20.0, 20.0, 30.0, 30.0, 0.9);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_partial_overlap() {
    let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
    let b = bbox(5.0, 0.0, 15.0, 10.0, 0.9);
    // 交集 50，并集 150
    assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn nms_suppresses_overlapping_box() {
    let boxes = vec![
      bbox(12.0, 12.0, 52.0, 52.0, 0.7),
      bbox(10.0, 10.0, 50.0, 50.0, 0.9),
      bbox(100.0, 100.0, 150.0, 150.0, 0.5),
    ];
    let kept = nms(boxes, 0.4);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].x1, 10.0);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[1].x1, 100.0);
  }

  #[test]
  fn nms_is_class_agnostic() {
    let mut car = bbox(12.0, 12.0, 52.0, 52.0, 0.7);
    car.class_id = 2;
    car.class_name = "car".to_string();
    let kept = nms(vec![bbox(10.0, 10.0, 50.0, 50.0, 0.9), car], 0.4);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, 0);
  }

  #[test]
  fn nms_isolated_box_always_survives() {
    for threshold in [0.0, 0.1, 0.4, 0.9, 1.0] {
      let kept = nms(
        vec![
          bbox(10.0, 10.0, 50.0, 50.0, 0.9),
          bbox(12.0, 12.0, 52.0, 52.0, 0.7),
          bbox(100.0, 100.0, 150.0, 150.0, 0.1),
        ],
        threshold,
      );
      assert!(kept.iter().any(|b| b.x1 == 100.0), "threshold {threshold}");
    }
  }

  #[test]
  fn nms_is_idempotent() {
    let boxes = vec![
      bbox(10.0, 10.0, 50.0, 50.0, 0.9),
      bbox(12.0, 12.0, 52.0, 52.0, 0.7),
      bbox(30.0, 30.0, 70.0, 70.0, 0.6),
      bbox(100.0, 100.0, 150.0, 150.0, 0.8),
      bbox(105.0, 98.0, 149.0, 151.0, 0.75),
    ];
    for threshold in [0.1, 0.3, 0.5, 0.7] {
      let once = nms(boxes.clone(), threshold);
      let twice = nms(once.clone(), threshold);
      assert_eq!(once, twice, "threshold {threshold}");
    }
  }

  #[test]
  fn nms_threshold_monotonicity() {
    let boxes = vec![
      bbox(10.0, 10.0, 50.0, 50.0, 0.9),
      bbox(100.0, 100.0, 150.0, 150.0, 0.8),
      bbox(12.0, 12.0, 52.0, 52.0, 0.7),
      bbox(30.0, 30.0, 70.0, 70.0, 0.6),
    ];
    let mut previous = 0;
    for threshold in [0.0, 0.1, 0.15, 0.2, 0.3, 0.5, 0.8, 0.9, 1.0] {
      let count = nms(boxes.clone(), threshold).len();
      assert!(count >= previous, "threshold {threshold}: {count} < {previous}");
      previous = count;
    }
    assert_eq!(previous, 4);
  }

  #[test]
  fn nms_of_empty_input() {
    assert!(nms(Vec::new(), 0.5).is_empty());
  }
}
