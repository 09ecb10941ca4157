// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode.rs - 量化检测输出解码
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

//! 量化 YOLO 多检测头输出解码。
//!
//! 数据流：`HeadDecoder` × 3 → `Suppressor` → `CoordinateMapper`，
//! 由 `DetectionDecodePipeline` 串联。

use std::collections::TryReserveError;

use thiserror::Error;

mod candidate;
mod head;
mod mapper;
mod nms;
mod pipeline;
mod quant;

pub use self::candidate::{Candidate, CandidateSet};
pub use self::head::{HeadDecoder, HeadTensor};
pub use self::mapper::{CoordinateMapper, MapStats};
pub use self::nms::{Suppressor, iou};
pub use self::pipeline::{DecodeStats, DetectionDecodePipeline};
pub use self::quant::{QuantParam, sigmoid, unsigmoid};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("候选框内存分配失败: {0}")]
  Allocation(#[from] TryReserveError),
  #[error("检测头张量大小不匹配: 期望 {expected}, 实际 {actual}")]
  TensorShape { expected: usize, actual: usize },
  #[error("类别数量不能为 0")]
  NoClasses,
}
