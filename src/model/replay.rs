// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/model/replay.rs - 回放模型
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

//! 回放已录制的检测头输出，不依赖 NPU。
//!
//! 目录结构：
//!
//! ```text
//! <dir>/quant.json   {"heads": [{"grid_h": 80, "grid_w": 80, "zero_point": -128, "scale": 0.0039}, ...]}
//! <dir>/head0.bin    原始 int8 数据
//! <dir>/head1.bin
//! <dir>/head2.bin
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::QuantParam,
  model::{HEAD_COUNT, InferenceOutput, Model, RawHeadOutput},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("模型路径必须使用 replay 方案")]
  SchemeMismatch,
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("量化参数文件解析失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("预期检测头数量为 {expected}, 实际为 {0}", expected = HEAD_COUNT)]
  HeadCount(usize),
}

#[derive(Debug, Deserialize)]
struct HeadManifest {
  grid_h: usize,
  grid_w: usize,
  #[serde(flatten)]
  quant: QuantParam,
}

#[derive(Debug, Deserialize)]
struct Manifest {
  heads: Vec<HeadManifest>,
}

/// 每次推理都返回同一份录制输出
#[derive(Debug, Clone)]
pub struct ReplayModel {
  output: InferenceOutput,
}

impl ReplayModel {
  pub fn new(output: InferenceOutput) -> Self {
    Self { output }
  }

  pub fn load(directory: impl AsRef<Path>) -> Result<Self, ReplayModelError> {
    let directory = directory.as_ref();
    info!("加载回放数据: {}", directory.display());

    let manifest_path = directory.join("quant.json");
    let manifest = std::fs::read(&manifest_path).map_err(|source| ReplayModelError::Io {
      path: manifest_path,
      source,
    })?;
    let manifest: Manifest = serde_json::from_slice(&manifest)?;
    let heads: [HeadManifest; HEAD_COUNT] = manifest
      .heads
      .try_into()
      .map_err(|heads: Vec<HeadManifest>| ReplayModelError::HeadCount(heads.len()))?;

    let mut outputs = Vec::with_capacity(HEAD_COUNT);
    for (idx, head) in heads.into_iter().enumerate() {
      let path = directory.join(format!("head{}.bin", idx));
      let bytes = std::fs::read(&path).map_err(|source| ReplayModelError::Io { path, source })?;
      debug!(
        "检测头 {}: {}x{}, {} 字节, zp={}, scale={}",
        idx,
        head.grid_h,
        head.grid_w,
        bytes.len(),
        head.quant.zero_point,
        head.quant.scale
      );
      outputs.push(RawHeadOutput {
        data: bytes.into_iter().map(|b| b as i8).collect(),
        grid_h: head.grid_h,
        grid_w: head.grid_w,
        quant: head.quant,
      });
    }
    let heads: [RawHeadOutput; HEAD_COUNT] = outputs
      .try_into()
      .map_err(|outputs: Vec<RawHeadOutput>| ReplayModelError::HeadCount(outputs.len()))?;

    Ok(Self::new(InferenceOutput { heads }))
  }

  pub fn output(&self) -> &InferenceOutput {
    &self.output
  }
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch);
    }
    let path = urlencoding::decode(url.path())
      .map_err(|e| ReplayModelError::ModelPathError(e.to_string()))?;
    if path.is_empty() {
      return Err(ReplayModelError::ModelPathError(url.to_string()));
    }
    Self::load(&*path)
  }
}

impl Model for ReplayModel {
  type Error = std::convert::Infallible;

  fn infer(&self, _input: &[u8], _width: u32, _height: u32) -> Result<InferenceOutput, Self::Error> {
    Ok(self.output.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("xunying-replay-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn loads_recorded_heads() {
    let dir = scratch_dir("load");
    std::fs::write(
      dir.join("quant.json"),
      r#"{"heads": [
        {"grid_h": 2, "grid_w": 2, "zero_point": -128, "scale": 0.5},
        {"grid_h": 1, "grid_w": 1, "zero_point": 0, "scale": 0.25},
        {"grid_h": 1, "grid_w": 1, "zero_point": 3, "scale": 1.0}
      ]}"#,
    )
    .unwrap();
    std::fs::write(dir.join("head0.bin"), [0xFFu8, 0x00, 0x7F, 0x80]).unwrap();
    std::fs::write(dir.join("head1.bin"), [1u8]).unwrap();
    std::fs::write(dir.join("head2.bin"), [2u8, 3]).unwrap();

    let url = Url::from_directory_path(&dir).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "replay", 1)).unwrap();
    let model = ReplayModel::from_url(&url).unwrap();
    let output = model.infer(&[], 0, 0).unwrap();

    assert_eq!(&*output.heads[0].data, &[-1i8, 0, 127, -128]);
    assert_eq!(output.heads[0].quant, QuantParam::new(-128, 0.5));
    assert_eq!(output.heads[2].data.len(), 2);
    let tensors = output.tensors();
    assert_eq!((tensors[1].grid_h, tensors[1].grid_w), (1, 1));
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn wrong_head_count_is_rejected() {
    let dir = scratch_dir("count");
    std::fs::write(
      dir.join("quant.json"),
      r#"{"heads": [{"grid_h": 2, "grid_w": 2, "zero_point": 0, "scale": 1.0}]}"#,
    )
    .unwrap();
    assert!(matches!(
      ReplayModel::load(&dir),
      Err(ReplayModelError::HeadCount(1))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("yolo:///tmp/model.rknn").unwrap();
    assert!(matches!(
      ReplayModel::from_url(&url),
      Err(ReplayModelError::SchemeMismatch)
    ));
  }
}
