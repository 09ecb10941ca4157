// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode/head.rs - 单检测头解码
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

use crate::config::{DecodePolicy, HeadSpec};

use super::{Candidate, CandidateSet, DecodeError, QuantParam, sigmoid, unsigmoid};

/// 每个网格单元的先验框数量
pub const ANCHORS_PER_CELL: usize = 3;

/// 单个检测头的原始量化输出视图
///
/// 布局为通道优先：每个先验框依次占 `5 + class_count` 个通道
/// （`box_x, box_y, box_w, box_h, objectness, class_0..`），
/// 每个通道是一整张 `grid_h × grid_w` 平面。
#[derive(Debug, Clone, Copy)]
pub struct HeadTensor<'a> {
  pub data: &'a [i8],
  pub grid_h: usize,
  pub grid_w: usize,
  pub quant: QuantParam,
}

impl HeadTensor<'_> {
  /// 网格尺寸溢出时返回 `None`
  pub fn expected_len(&self, class_count: usize) -> Option<usize> {
    self
      .grid_h
      .checked_mul(self.grid_w)?
      .checked_mul(ANCHORS_PER_CELL)?
      .checked_mul(class_count.checked_add(5)?)
  }
}

/// 将一个检测头的量化张量解码为候选框
pub struct HeadDecoder<'a> {
  spec: &'a HeadSpec,
  class_count: usize,
  policy: DecodePolicy,
}

impl<'a> HeadDecoder<'a> {
  pub fn new(spec: &'a HeadSpec, class_count: usize, policy: DecodePolicy) -> Self {
    Self {
      spec,
      class_count,
      policy,
    }
  }

  /// objectness 阈值在量化域中的取值，每次调用只计算一次
  ///
  /// 策略 A 的分数是 `sigmoid(objectness)`，所以先对阈值取反 sigmoid；
  /// 策略 B 的 objectness 已是概率。
  fn quantized_threshold(&self, quant: &QuantParam, confidence_threshold: f32) -> i8 {
    match self.policy {
      DecodePolicy::ObjectnessGlobal => quant.quantize(unsigmoid(confidence_threshold)),
      DecodePolicy::JointPerClass => quant.quantize(confidence_threshold),
    }
  }

  /// 解码并按扫描顺序（先验框 → 行 → 列）追加到 `out`，返回本头贡献的候选数
  pub fn decode(
    &self,
    tensor: &HeadTensor<'_>,
    confidence_threshold: f32,
    out: &mut CandidateSet,
  ) -> Result<usize, DecodeError> {
    if self.class_count == 0 {
      return Err(DecodeError::NoClasses);
    }
    // 溢出的网格尺寸按 usize::MAX 报告
    let expected = tensor.expected_len(self.class_count).unwrap_or(usize::MAX);
    if tensor.data.len() != expected {
      return Err(DecodeError::TensorShape {
        expected,
        actual: tensor.data.len(),
      });
    }

    let data = tensor.data;
    let quant = &tensor.quant;
    let grid_w = tensor.grid_w;
    let grid_len = tensor.grid_h * grid_w;
    let prop_size = 5 + self.class_count;
    let stride = self.spec.stride as f32;
    let threshold_q = self.quantized_threshold(quant, confidence_threshold);

    let mut count = 0;
    for (a, &[anchor_w, anchor_h]) in self.spec.anchors.iter().enumerate() {
      let base = a * prop_size * grid_len;
      let channel = |c: usize, cell: usize| data[base + c * grid_len + cell];

      for i in 0..tensor.grid_h {
        for j in 0..grid_w {
          let cell = i * grid_w + j;
          let objectness_q = channel(4, cell);
          if objectness_q < threshold_q {
            continue;
          }

          // 仿射反量化保持单调，直接比较量化值
          let mut max_class_q = channel(5, cell);
          let mut class_id = 0usize;
          for c in 1..self.class_count {
            let value = channel(5 + c, cell);
            if value > max_class_q {
              max_class_q = value;
              class_id = c;
            }
          }

          let score = match self.policy {
            DecodePolicy::ObjectnessGlobal => sigmoid(quant.dequantize(objectness_q)),
            DecodePolicy::JointPerClass => {
              let joint = quant.dequantize(max_class_q) * quant.dequantize(objectness_q);
              if joint < confidence_threshold {
                continue;
              }
              joint
            }
          };

          let mut bx = sigmoid(quant.dequantize(channel(0, cell))) * 2.0 - 0.5;
          let mut by = sigmoid(quant.dequantize(channel(1, cell))) * 2.0 - 0.5;
          let mut bw = sigmoid(quant.dequantize(channel(2, cell))) * 2.0;
          let mut bh = sigmoid(quant.dequantize(channel(3, cell))) * 2.0;
          bx = (bx + j as f32) * stride;
          by = (by + i as f32) * stride;
          bw = bw * bw * anchor_w as f32;
          bh = bh * bh * anchor_h as f32;
          bx -= bw / 2.0;
          by -= bh / 2.0;

          out.push(Candidate {
            x: bx,
            y: by,
            w: bw,
            h: bh,
            score,
            class_id: class_id as u32,
          })?;
          count += 1;
        }
      }
    }

    Ok(count)
  }
}
