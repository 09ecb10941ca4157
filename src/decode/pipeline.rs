// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode/pipeline.rs - 检测解码流水线
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

use tracing::{debug, error};

use crate::{
  config::{DecodeConfig, DecodePolicy},
  detection::DetectionResultSet,
};

use super::{CandidateSet, CoordinateMapper, DecodeError, HeadDecoder, HeadTensor, Suppressor};

/// 单帧解码的诊断统计，不参与后续决策
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
  pub per_head: [usize; 3],
  pub candidates: usize,
  pub survivors: usize,
  pub emitted: usize,
  pub below_threshold: usize,
  pub truncated: usize,
}

/// 三个检测头 → NMS → 坐标映射
#[derive(Debug, Clone)]
pub struct DetectionDecodePipeline {
  config: DecodeConfig,
}

impl DetectionDecodePipeline {
  pub fn new(config: DecodeConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &DecodeConfig {
    &self.config
  }

  pub fn policy(&self) -> DecodePolicy {
    self.config.policy
  }

  /// 解码一帧的检测头输出，结果覆盖写入 `out`
  ///
  /// 张量尺寸不符的检测头会被跳过；分配失败则放弃整帧，`out` 保持为空。
  pub fn decode(
    &self,
    heads: &[HeadTensor<'_>],
    frame_w: u32,
    frame_h: u32,
    out: &mut DetectionResultSet,
  ) -> Result<DecodeStats, DecodeError> {
    let config = &self.config;
    out.reset(config.policy.confidence_scale());

    let mut stats = DecodeStats::default();
    let mut candidates = CandidateSet::new();
    for (head_idx, (tensor, spec)) in heads.iter().zip(config.heads.iter()).enumerate() {
      let decoder = HeadDecoder::new(spec, config.class_count, config.policy);
      match decoder.decode(tensor, config.confidence_threshold, &mut candidates) {
        Ok(count) => {
          debug!("检测头 {}: {} 个候选框", head_idx, count);
          stats.per_head[head_idx] = count;
        }
        Err(DecodeError::TensorShape { expected, actual }) => {
          error!(
            "检测头 {}: 输出大小不匹配 - 期望 {}, 实际 {}，跳过",
            head_idx, expected, actual
          );
        }
        Err(e) => {
          error!("检测头 {}: 解码失败，放弃本帧: {}", head_idx, e);
          out.clear();
          return Err(e);
        }
      }
    }
    stats.candidates = candidates.len();

    let ranked = Suppressor::new(config.policy, config.nms_threshold).suppress(&candidates);
    stats.survivors = ranked.len();

    let (letterbox, visualization_threshold) = match config.policy {
      DecodePolicy::ObjectnessGlobal => (None, Some(config.visualization_threshold)),
      DecodePolicy::JointPerClass => (config.letterbox, None),
    };
    let mapper = CoordinateMapper::new(
      config.model_input_width,
      config.model_input_height,
      frame_w,
      frame_h,
    )
    .with_letterbox(letterbox)
    .with_visualization_threshold(visualization_threshold);
    let mapped = mapper.map_into(&candidates, &ranked, out);
    stats.emitted = mapped.emitted;
    stats.below_threshold = mapped.below_threshold;
    stats.truncated = mapped.truncated;

    debug!(
      "解码完成: 候选 {}, NMS 后 {}, 输出 {}, 截断 {}",
      stats.candidates, stats.survivors, stats.emitted, stats.truncated
    );
    Ok(stats)
  }
}
