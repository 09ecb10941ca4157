// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/model.rs - 推理模型接口
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

//! 推理引擎抽象。
//!
//! 引擎本身在本仓库之外，这里只约定它交给解码器的输出形态：
//! 三个 int8 检测头张量及各自的量化参数。

use crate::decode::{HeadTensor, QuantParam};

mod replay;
pub use self::replay::{ReplayModel, ReplayModelError};

pub const HEAD_COUNT: usize = 3;

/// 单个检测头的原始 int8 输出
#[derive(Debug, Clone, PartialEq)]
pub struct RawHeadOutput {
  pub data: Box<[i8]>,
  pub grid_h: usize,
  pub grid_w: usize,
  pub quant: QuantParam,
}

impl RawHeadOutput {
  pub fn as_tensor(&self) -> HeadTensor<'_> {
    HeadTensor {
      data: &self.data,
      grid_h: self.grid_h,
      grid_w: self.grid_w,
      quant: self.quant,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
  pub heads: [RawHeadOutput; HEAD_COUNT],
}

impl InferenceOutput {
  pub fn tensors(&self) -> [HeadTensor<'_>; HEAD_COUNT] {
    self.heads.each_ref().map(RawHeadOutput::as_tensor)
  }
}

pub trait Model {
  type Error;

  /// `input` 为紧密排列的 RGB 帧数据
  fn infer(&self, input: &[u8], width: u32, height: u32) -> Result<InferenceOutput, Self::Error>;
}
