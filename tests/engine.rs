// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// tests/engine.rs - 推理流水线测试
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

mod common;

use std::{fs, sync::Arc, thread};

use common::*;
use image::RgbImage;
use shanan_edge::{
  inference::{InferenceEngine, InferenceError, InferenceOptions, InferenceStatistics},
  model::{ModelFormat, ModelLoader},
};

fn options() -> InferenceOptions {
  InferenceOptions {
    target_size: (INPUT_SIZE as u32, INPUT_SIZE as u32),
    ..Default::default()
  }
}

fn engine_with(class_id: usize, options: InferenceOptions) -> (tempfile::TempDir, InferenceEngine) {
  let dir = tempfile::tempdir().unwrap();
  write_model(dir.path(), "det.onnx", class_id);
  let (_, runtime) = mock_runtime();
  let loader = Arc::new(ModelLoader::new(dir.path(), runtime));
  let engine = InferenceEngine::new(loader.clone(), options);
  loader.load("det", ModelFormat::Interchange, None).unwrap();
  (dir, engine)
}

#[test]
fn inference_requires_loaded_model() {
  let dir = tempfile::tempdir().unwrap();
  let (_, runtime) = mock_runtime();
  let loader = Arc::new(ModelLoader::new(dir.path(), runtime));
  let engine = InferenceEngine::new(loader, options());

  let err = engine.infer(&gray_frame(64, 64)).unwrap_err();
  assert!(matches!(err, InferenceError::ModelNotLoaded));
  assert!(err.is_retryable());
  assert!(matches!(
    engine.infer_batch(&[gray_frame(64, 64)]),
    Err(InferenceError::ModelNotLoaded)
  ));
  assert_eq!(engine.get_statistics(), InferenceStatistics::default());
}

#[test]
fn detections_are_mapped_back_to_frame() {
  let (_dir, engine) = engine_with(2, options());

  let result = engine.infer(&gray_frame(64, 64)).unwrap();
  assert_eq!(result.len(), 1);
  assert_eq!(result.frame_shape, (64, 64));
  assert_eq!(result.model_input_shape, (64, 64));
  let b = &result.boxes[0];
  assert_eq!(b.class_id, 2);
  assert_eq!(b.class_name, "car");
  assert!((b.x1 - 22.0).abs() < 1e-3 && (b.x2 - 42.0).abs() < 1e-3);

  // 128x64 缩放 0.5, 上下各填充 16
  let result = engine.infer(&gray_frame(128, 64)).unwrap();
  assert_eq!(result.frame_shape, (64, 128));
  let b = &result.boxes[0];
  assert!((b.x1 - 44.0).abs() < 1e-3, "{:?}", b);
  assert!((b.x2 - 84.0).abs() < 1e-3, "{:?}", b);
  assert!((b.y1 - 12.0).abs() < 1e-3, "{:?}", b);
  assert!((b.y2 - 52.0).abs() < 1e-3, "{:?}", b);
}

#[test]
fn statistics_accumulate_and_reset() {
  let (_dir, engine) = engine_with(0, options());

  for _ in 0..3 {
    engine.infer(&gray_frame(32, 48)).unwrap();
  }
  let results = engine
    .infer_batch(&[gray_frame(64, 64), gray_frame(80, 40)])
    .unwrap();
  assert_eq!(results.len(), 2);
  assert!(results.iter().all(|r| r.boxes[0].class_name == "person"));

  let stats = engine.get_statistics();
  assert_eq!(stats.total_inferences, 5);
  assert!(stats.total_time_ms > 0.0);
  assert!((stats.average_time_ms - stats.total_time_ms / 5.0).abs() < 1e-9);

  engine.reset_statistics();
  assert_eq!(engine.get_statistics(), InferenceStatistics::default());
}

#[test]
fn empty_frame_is_a_caller_error() {
  let (_dir, engine) = engine_with(0, options());

  let err = engine.infer(&RgbImage::new(0, 0)).unwrap_err();
  assert!(matches!(err, InferenceError::Preprocess(_)));
  assert!(err.is_caller_error());
  assert_eq!(engine.get_statistics().total_inferences, 0);
}

#[test]
fn threshold_above_score_yields_no_boxes() {
  let (_dir, engine) = engine_with(
    0,
    InferenceOptions {
      confidence_threshold: 0.95,
      ..options()
    },
  );
  assert!(engine.infer(&gray_frame(64, 64)).unwrap().is_empty());
}

#[test]
fn mismatched_input_size_is_an_engine_error() {
  let (_dir, engine) = engine_with(
    0,
    InferenceOptions {
      target_size: (32, 32),
      ..Default::default()
    },
  );

  let err = engine.infer(&gray_frame(64, 64)).unwrap_err();
  assert!(matches!(err, InferenceError::Engine(_)));
  assert!(err.is_retryable());
  assert!(!err.is_caller_error());
}

#[test]
fn concurrent_callers_are_all_counted() {
  let (_dir, engine) = engine_with(0, options());

  thread::scope(|scope| {
    for _ in 0..4 {
      scope.spawn(|| {
        for _ in 0..10 {
          engine.infer(&gray_frame(64, 64)).unwrap();
        }
      });
    }
  });

  let stats = engine.get_statistics();
  assert_eq!(stats.total_inferences, 40);
  assert!((stats.average_time_ms - stats.total_time_ms / 40.0).abs() < 1e-9);
}

#[test]
fn inference_keeps_its_model_across_reload() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("det.onnx");
  fs::write(&path, format!("{} gated", model_content(1))).unwrap();
  let gate = Gate::new();
  let loader = Arc::new(ModelLoader::new(dir.path(), gated_runtime(gate.clone())));
  let engine = Arc::new(InferenceEngine::new(loader.clone(), options()));
  loader.load("det", ModelFormat::Interchange, None).unwrap();

  let worker = {
    let engine = engine.clone();
    thread::spawn(move || engine.infer(&gray_frame(64, 64)))
  };

  // 推理停在旧模型内部时完成替换
  gate.entered.wait();
  fs::write(&path, model_content(2)).unwrap();
  loader.reload().unwrap();
  assert_eq!(
    loader.current_info().unwrap().checksum,
    Some(sha256_hex(&model_content(2)))
  );
  gate.release.wait();

  let result = worker.join().unwrap().unwrap();
  assert_eq!(result.boxes[0].class_id, 1);

  let result = engine.infer(&gray_frame(64, 64)).unwrap();
  assert_eq!(result.boxes[0].class_id, 2);
  assert_eq!(engine.get_statistics().total_inferences, 2);
}
