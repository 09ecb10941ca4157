// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use serde::Serialize;

/// 每帧最多输出的检测数量
pub const OBJ_MAX: usize = 64;

/// 原始帧像素坐标下的检测框，`left <= right`，`top <= bottom`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DetectionBox {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

impl DetectionBox {
  pub fn width(&self) -> i32 {
    self.right - self.left
  }

  pub fn height(&self) -> i32 {
    self.bottom - self.top
  }
}

/// 归一化到 [0, 1] 的检测框（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct NormalizedBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

/// 置信度的量纲，取决于产生结果集的解码策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
  /// 0 - 100
  Percent,
  /// 0 - 1
  Probability,
}

impl ConfidenceScale {
  pub fn from_probability(self, score: f32) -> f32 {
    match self {
      ConfidenceScale::Percent => score * 100.0,
      ConfidenceScale::Probability => score,
    }
  }

  pub fn to_probability(self, confidence: f32) -> f32 {
    match self {
      ConfidenceScale::Percent => confidence / 100.0,
      ConfidenceScale::Probability => confidence,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
  pub bbox: DetectionBox,
  pub normalized: NormalizedBox,
  pub class_id: u32,
  pub confidence: f32,
  /// 由外部跟踪器填写
  pub track_id: Option<u32>,
}

/// 固定容量的单帧检测结果集
///
/// 由调用方持有并逐帧原地覆盖，容量满后 `push` 返回被拒绝的结果，从不增长。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResultSet {
  items: heapless::Vec<DetectionResult, OBJ_MAX>,
  confidence_scale: ConfidenceScale,
}

impl DetectionResultSet {
  pub fn new(confidence_scale: ConfidenceScale) -> Self {
    Self {
      items: heapless::Vec::new(),
      confidence_scale,
    }
  }

  /// 清空结果并设置本帧使用的置信度量纲
  pub fn reset(&mut self, confidence_scale: ConfidenceScale) {
    self.items.clear();
    self.confidence_scale = confidence_scale;
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  pub fn push(&mut self, result: DetectionResult) -> Result<(), DetectionResult> {
    self.items.push(result)
  }

  pub fn confidence_scale(&self) -> ConfidenceScale {
    self.confidence_scale
  }

  pub const fn capacity(&self) -> usize {
    OBJ_MAX
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn is_full(&self) -> bool {
    self.items.is_full()
  }

  pub fn as_slice(&self) -> &[DetectionResult] {
    &self.items
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectionResult> {
    self.items.iter()
  }

  pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, DetectionResult> {
    self.items.iter_mut()
  }

  /// 按给定尺寸计算归一化框，结果截断到 [0, 1]
  pub fn normalize(&mut self, width: u32, height: u32) {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    for item in self.items.iter_mut() {
      let b = item.bbox;
      item.normalized = NormalizedBox {
        x: (b.left as f32 / w).clamp(0.0, 1.0),
        y: (b.top as f32 / h).clamp(0.0, 1.0),
        w: (b.width() as f32 / w).clamp(0.0, 1.0),
        h: (b.height() as f32 / h).clamp(0.0, 1.0),
      };
    }
  }
}

impl<'a> IntoIterator for &'a DetectionResultSet {
  type Item = &'a DetectionResult;
  type IntoIter = std::slice::Iter<'a, DetectionResult>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
