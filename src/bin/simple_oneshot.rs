// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理
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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_edge::{
  FromUrl, codec, filter,
  inference::{InferenceEngine, InferenceOptions},
  model::{ModelLoader, ModelSpec},
  runtime::{DEVICE_AUTO, Runtime},
  server::InferenceResponse,
};

/// 单张图像推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 onnx:///models/yolov8n
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像文件
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 推理设备
  #[arg(long, value_name = "DEVICE", default_value = DEVICE_AUTO)]
  pub device: String,
  /// 置信度阈值
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.5)]
  pub confidence: f32,
  /// NMS 阈值
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.4)]
  pub nms_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());

  let spec = ModelSpec::from_url(&args.model)?;
  let runtime = Runtime::detect(&args.device)?;
  let loader = Arc::new(ModelLoader::new(spec.dir.clone(), runtime));
  loader.load(&spec.name, spec.format, spec.version.as_deref())?;

  let engine = InferenceEngine::new(
    loader,
    InferenceOptions {
      confidence_threshold: args.confidence,
      nms_threshold: args.nms_threshold,
      ..Default::default()
    },
  );

  let bytes = std::fs::read(&args.input)
    .with_context(|| format!("无法读取输入图像: {}", args.input.display()))?;
  let frame = codec::decode(&bytes)?;

  info!("开始推理...");
  let result = engine.infer(&frame)?;
  info!(
    "推理完成，耗时: {:.2} ms, 检测到 {} 个目标",
    result.inference_time_ms,
    result.len()
  );
  for (class_name, summary) in filter::summary(&result) {
    info!(
      "{}: {} 个, 最高置信度 {:.2}, 平均置信度 {:.2}",
      class_name, summary.count, summary.max_confidence, summary.avg_confidence
    );
  }

  println!(
    "{}",
    serde_json::to_string_pretty(&InferenceResponse::from(result))?
  );
  Ok(())
}
