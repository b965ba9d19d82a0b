// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/frame.rs - NCHW 张量定义
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
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

/// 模型期望的通道顺序，输入帧统一为 RGB
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 模型第 `c` 个通道对应 RGB 像素中的下标
  pub fn source_channel(&self, c: usize) -> usize {
    match self {
      ChannelOrder::Rgb => c,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
    }
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("数据长度不匹配: 形状 {shape:?} 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量形状不一致: {0:?} 与 {1:?}")]
  ShapeMismatch(Vec<usize>, Vec<usize>),
  #[error("无法拼接空张量列表")]
  Empty,
}

/// 行优先存储的 f32 张量，用于模型输入（NCHW）与原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
    let expected = shape.iter().product::<usize>();
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn zeros(shape: Vec<usize>) -> Self {
    let size = shape.iter().product::<usize>();
    Self {
      shape,
      data: vec![0.0; size],
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_data(self) -> Vec<f32> {
    self.data
  }

  /// 第一维长度，标量张量视为 1
  pub fn batch(&self) -> usize {
    self.shape.first().copied().unwrap_or(1)
  }

  /// 第 `index` 个批次元素的数据切片
  pub fn batch_item(&self, index: usize) -> Option<&[f32]> {
    let batch = self.batch();
    if index >= batch {
      return None;
    }
    let stride = self.data.len() / batch.max(1);
    Some(&self.data[index * stride..(index + 1) * stride])
  }

  /// 沿批次维拼接若干形状相同（除第一维外）的张量
  pub fn concat(parts: &[Tensor]) -> Result<Tensor, TensorError> {
    let first = parts.first().ok_or(TensorError::Empty)?;
    let tail = &first.shape[1.min(first.shape.len())..];

    let mut batch = 0;
    let mut data = Vec::with_capacity(parts.iter().map(|t| t.data.len()).sum());
    for part in parts {
      if &part.shape[1.min(part.shape.len())..] != tail {
        return Err(TensorError::ShapeMismatch(
          first.shape.clone(),
          part.shape.clone(),
        ));
      }
      batch += part.batch();
      data.extend_from_slice(&part.data);
    }

    let mut shape = Vec::with_capacity(first.shape.len().max(1));
    shape.push(batch);
    shape.extend_from_slice(tail);
    Tensor::new(shape, data)
  }
}

impl AsRef<[f32]> for Tensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_checks_length() {
    assert!(Tensor::new(vec![1, 3, 2, 2], vec![0.0; 12]).is_ok());
    assert_eq!(
      Tensor::new(vec![1, 3, 2, 2], vec![0.0; 11]),
      Err(TensorError::LengthMismatch {
        shape: vec![1, 3, 2, 2],
        expected: 12,
        actual: 11
      })
    );
  }

  #[test]
  fn concat_along_batch() {
    let a = Tensor::new(vec![1, 2], vec![1.0, 2.0]).unwrap();
    let b = Tensor::new(vec![2, 2], vec![3.0, 4.0, 5.0, 6.0]).unwrap();
    let c = Tensor::concat(&[a, b]).unwrap();
    assert_eq!(c.shape(), &[3, 2]);
    assert_eq!(c.batch_item(1), Some(&[3.0, 4.0][..]));
    assert_eq!(c.batch_item(3), None);
  }

  #[test]
  fn concat_rejects_mismatched_shapes() {
    let a = Tensor::zeros(vec![1, 2]);
    let b = Tensor::zeros(vec![1, 3]);
    assert!(matches!(
      Tensor::concat(&[a, b]),
      Err(TensorError::ShapeMismatch(_, _))
    ));
    assert_eq!(Tensor::concat(&[]), Err(TensorError::Empty));
  }

  #[test]
  fn bgr_reverses_channels() {
    assert_eq!(ChannelOrder::Rgb.source_channel(0), 0);
    assert_eq!(ChannelOrder::Bgr.source_channel(0), 2);
    assert_eq!(ChannelOrder::Bgr.source_channel(2), 0);
  }
}
