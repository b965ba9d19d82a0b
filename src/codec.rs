// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/codec.rs - 图像编解码
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

use std::io::Cursor;

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{ImageFormat, ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

/// 编解码错误均属于调用方输入错误
#[derive(Error, Debug)]
pub enum CodecError {
  #[error("图像数据为空")]
  Empty,
  #[error("Base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("图像解码失败: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 解码 JPEG/PNG/BMP 字节为 RGB 图像
pub fn decode(bytes: &[u8]) -> Result<RgbImage, CodecError> {
  if bytes.is_empty() {
    return Err(CodecError::Empty);
  }

  let image = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()?
    .decode()?
    .to_rgb8();
  debug!("图像解码完成: {}x{}", image.width(), image.height());
  Ok(image)
}

/// 解码 Base64 编码的图像
pub fn decode_base64(data: &str) -> Result<RgbImage, CodecError> {
  let bytes = STANDARD.decode(data.trim())?;
  decode(&bytes)
}

/// 按指定格式编码图像
pub fn encode(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, CodecError> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, format)?;
  Ok(buffer.into_inner())
}

/// 编码为 Base64 字符串
pub fn encode_base64(image: &RgbImage, format: ImageFormat) -> Result<String, CodecError> {
  Ok(STANDARD.encode(encode(image, format)?))
}
