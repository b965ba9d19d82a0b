// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/model/checksum.rs - 模型文件 SHA-256 校验
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
  fs::File,
  io::{self, Read},
  path::Path,
};

use sha2::{Digest, Sha256};

const CHUNK_SIZE: usize = 64 * 1024;

/// 流式计算单个文件的 SHA-256，返回小写十六进制
pub fn file_sha256(path: &Path) -> io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = vec![0u8; CHUNK_SIZE];

  loop {
    let n = file.read(&mut buffer)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }

  Ok(format!("{:x}", hasher.finalize()))
}

/// 模型校验和：`sha256(primary)` 或 `sha256(primary):sha256(weights)`
pub fn model_checksum(primary: &Path, weights: Option<&Path>) -> io::Result<String> {
  let primary = file_sha256(primary)?;
  match weights {
    Some(weights) => Ok(format!("{}:{}", primary, file_sha256(weights)?)),
    None => Ok(primary),
  }
}
