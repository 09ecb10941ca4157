// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode/mapper.rs - 坐标映射
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

use crate::{
  config::Letterbox,
  detection::{DetectionBox, DetectionResult, DetectionResultSet, NormalizedBox},
};

use super::CandidateSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
  pub emitted: usize,
  pub below_threshold: usize,
  /// 因结果集容量已满而未处理的幸存候选数
  pub truncated: usize,
}

/// 将幸存候选框从模型输入空间映射回原始帧像素坐标
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
  model_w: f32,
  model_h: f32,
  scale_w: f32,
  scale_h: f32,
  letterbox: Option<Letterbox>,
  visualization_threshold: Option<f32>,
}

/// 非正数或非有限的缩放系数替换为 1.0
fn sane_scale(scale: f32) -> f32 {
  if scale.is_finite() && scale > 0.0 { scale } else { 1.0 }
}

impl CoordinateMapper {
  /// `scale = model_size / frame_size`
  pub fn new(model_w: u32, model_h: u32, frame_w: u32, frame_h: u32) -> Self {
    Self {
      model_w: model_w as f32,
      model_h: model_h as f32,
      scale_w: sane_scale(model_w as f32 / frame_w as f32),
      scale_h: sane_scale(model_h as f32 / frame_h as f32),
      letterbox: None,
      visualization_threshold: None,
    }
  }

  pub fn with_letterbox(mut self, letterbox: Option<Letterbox>) -> Self {
    self.letterbox = letterbox;
    self
  }

  pub fn with_visualization_threshold(mut self, threshold: Option<f32>) -> Self {
    self.visualization_threshold = threshold;
    self
  }

  pub fn scale(&self) -> (f32, f32) {
    (self.scale_w, self.scale_h)
  }

  /// 按 `ranked` 顺序写入 `out`，直到候选耗尽或结果集已满
  ///
  /// 置信度量纲取自 `out` 当前设置。
  pub fn map_into(
    &self,
    candidates: &CandidateSet,
    ranked: &[usize],
    out: &mut DetectionResultSet,
  ) -> MapStats {
    let scale = out.confidence_scale();
    let (x_pad, y_pad) = self
      .letterbox
      .map(|lb| (lb.x_pad, lb.y_pad))
      .unwrap_or((0.0, 0.0));
    let mut stats = MapStats::default();

    for (rank, &index) in ranked.iter().enumerate() {
      if out.is_full() {
        stats.truncated = ranked.len() - rank;
        break;
      }
      let Some(c) = candidates.get(index) else {
        continue;
      };
      if let Some(threshold) = self.visualization_threshold {
        if c.score < threshold {
          stats.below_threshold += 1;
          continue;
        }
      }

      let x1 = (c.x - x_pad).clamp(0.0, self.model_w);
      let y1 = (c.y - y_pad).clamp(0.0, self.model_h);
      let x2 = (c.x - x_pad + c.w).clamp(0.0, self.model_w);
      let y2 = (c.y - y_pad + c.h).clamp(0.0, self.model_h);

      let result = DetectionResult {
        bbox: DetectionBox {
          left: (x1 / self.scale_w) as i32,
          top: (y1 / self.scale_h) as i32,
          right: (x2 / self.scale_w) as i32,
          bottom: (y2 / self.scale_h) as i32,
        },
        normalized: NormalizedBox::default(),
        class_id: c.class_id,
        confidence: scale.from_probability(c.score),
        track_id: None,
      };
      if out.push(result).is_err() {
        stats.truncated = ranked.len() - rank;
        break;
      }
      stats.emitted += 1;
    }

    stats
  }
}
