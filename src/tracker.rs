// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/tracker.rs - 多目标跟踪接口
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

use std::convert::Infallible;

use crate::detection::DetectionResultSet;

/// 多目标跟踪器，为检测结果填充 `track_id`
///
/// 每帧最多调用一次，且仅在检测数量大于零时调用。
pub trait Tracker {
  type Error;
  fn update(&mut self, detections: &mut DetectionResultSet) -> Result<(), Self::Error>;
}

/// 不做关联，保留 `track_id` 为空
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl Tracker for NullTracker {
  type Error = Infallible;

  fn update(&mut self, _detections: &mut DetectionResultSet) -> Result<(), Self::Error> {
    Ok(())
  }
}
