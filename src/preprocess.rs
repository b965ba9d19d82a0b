// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/preprocess.rs - letterbox 预处理
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

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{ChannelOrder, RGB_CHANNELS, Tensor, TensorError},
  geometry::{LETTERBOX_PAD_VALUE, Letterbox},
};

pub const DEFAULT_TARGET_SIZE: (u32, u32) = (640, 640);

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("没有输入帧")]
  NoFrames,
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

impl PreprocessError {
  pub fn is_caller_error(&self) -> bool {
    matches!(
      self,
      PreprocessError::EmptyFrame { .. } | PreprocessError::NoFrames
    )
  }
}

/// 把任意尺寸的 RGB 帧变换为模型输入张量
#[derive(Debug, Clone)]
pub struct Preprocessor {
  target_width: u32,
  target_height: u32,
  channel_order: ChannelOrder,
}

impl Default for Preprocessor {
  fn default() -> Self {
    Self::new(DEFAULT_TARGET_SIZE)
  }
}

impl Preprocessor {
  /// `target_size` 为 (width, height)
  pub fn new(target_size: (u32, u32)) -> Self {
    Self {
      target_width: target_size.0,
      target_height: target_size.1,
      channel_order: ChannelOrder::Rgb,
    }
  }

  pub fn with_channel_order(mut self, channel_order: ChannelOrder) -> Self {
    self.channel_order = channel_order;
    self
  }

  /// (width, height)
  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  /// letterbox 缩放、填充、归一化，返回 `[1, 3, H, W]` 张量及逆变换参数
  pub fn preprocess(&self, frame: &RgbImage) -> Result<(Tensor, Letterbox), PreprocessError> {
    let (frame_w, frame_h) = frame.dimensions();
    let letterbox = Letterbox::fit(frame_w, frame_h, self.target_width, self.target_height)
      .ok_or(PreprocessError::EmptyFrame {
        width: frame_w,
        height: frame_h,
      })?;

    let canvas = self.letterbox_image(frame, &letterbox);
    let tensor = self.to_nchw(&canvas)?;

    debug!(
      "预处理完成: {}x{} -> {}x{}, scale={:.4}, pad=({}, {})",
      frame_w,
      frame_h,
      self.target_width,
      self.target_height,
      letterbox.scale,
      letterbox.pad_x,
      letterbox.pad_y
    );

    Ok((tensor, letterbox))
  }

  /// 逐帧预处理后沿批次维拼接，各帧尺寸可以不同
  pub fn preprocess_batch(
    &self,
    frames: &[RgbImage],
  ) -> Result<(Tensor, Vec<Letterbox>), PreprocessError> {
    if frames.is_empty() {
      return Err(PreprocessError::NoFrames);
    }

    let mut tensors = Vec::with_capacity(frames.len());
    let mut letterboxes = Vec::with_capacity(frames.len());
    for frame in frames {
      let (tensor, letterbox) = self.preprocess(frame)?;
      tensors.push(tensor);
      letterboxes.push(letterbox);
    }

    Ok((Tensor::concat(&tensors)?, letterboxes))
  }

  fn letterbox_image(&self, frame: &RgbImage, letterbox: &Letterbox) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(
      self.target_width,
      self.target_height,
      Rgb([LETTERBOX_PAD_VALUE; RGB_CHANNELS]),
    );

    if frame.dimensions() == (letterbox.new_width, letterbox.new_height) {
      imageops::replace(&mut canvas, frame, letterbox.pad_x as i64, letterbox.pad_y as i64);
    } else {
      let resized = imageops::resize(
        frame,
        letterbox.new_width,
        letterbox.new_height,
        imageops::FilterType::Triangle,
      );
      imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
      );
    }

    canvas
  }

  fn to_nchw(&self, canvas: &RgbImage) -> Result<Tensor, TensorError> {
    let height = canvas.height() as usize;
    let width = canvas.width() as usize;
    let plane = height * width;

    let mut data = vec![0f32; RGB_CHANNELS * plane];
    for (index, pixel) in canvas.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        let value = pixel[self.channel_order.source_channel(c)];
        data[c * plane + index] = value as f32 / 255.0;
      }
    }

    Tensor::new(vec![1, RGB_CHANNELS, height, width], data)
  }
}
