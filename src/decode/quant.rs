// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode/quant.rs - 仿射量化参数
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

use serde::{Deserialize, Serialize};

/// 单个张量的仿射量化参数，`real = (q - zero_point) * scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParam {
  pub zero_point: i32,
  pub scale: f32,
}

impl QuantParam {
  pub fn new(zero_point: i32, scale: f32) -> Self {
    Self { zero_point, scale }
  }

  #[inline]
  pub fn dequantize(&self, value: i8) -> f32 {
    (value as i32 - self.zero_point) as f32 * self.scale
  }

  /// 浮点转 int8，超出范围时饱和，小数部分向零截断
  #[inline]
  pub fn quantize(&self, value: f32) -> i8 {
    if self.scale == 0.0 {
      return self.zero_point.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
    }
    let dst = value / self.scale + self.zero_point as f32;
    dst.clamp(i8::MIN as f32, i8::MAX as f32) as i8
  }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// sigmoid 的反函数，0 与 1 分别映射到负无穷与正无穷
#[inline]
pub fn unsigmoid(y: f32) -> f32 {
  -(1.0 / y - 1.0).ln()
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  #[test]
  fn dequantize_is_affine() {
    let q = QuantParam::new(-10, 0.5);
    assert_relative_eq!(q.dequantize(-10), 0.0);
    assert_relative_eq!(q.dequantize(0), 5.0);
    assert_relative_eq!(q.dequantize(-128), -59.0);
  }

  #[test]
  fn quantize_saturates_and_truncates() {
    let q = QuantParam::new(0, 0.1);
    assert_eq!(q.quantize(1000.0), 127);
    assert_eq!(q.quantize(-1000.0), -128);
    assert_eq!(q.quantize(0.25), 2);
    assert_eq!(q.quantize(-0.25), -2);
    assert_eq!(q.quantize(f32::INFINITY), 127);
    assert_eq!(q.quantize(f32::NEG_INFINITY), -128);
  }

  #[test]
  fn zero_scale_quantizes_to_zero_point() {
    let q = QuantParam::new(300, 0.0);
    assert_eq!(q.quantize(0.7), 127);
  }

  #[test]
  fn unsigmoid_inverts_sigmoid() {
    for y in [0.1f32, 0.25, 0.5, 0.9] {
      assert_relative_eq!(sigmoid(unsigmoid(y)), y, epsilon = 1e-6);
    }
    assert_eq!(unsigmoid(0.0), f32::NEG_INFINITY);
  }

  #[test]
  fn quantized_order_matches_real_order() {
    let q = QuantParam::new(-5, 0.037);
    let mut prev = f32::MIN;
    for v in i8::MIN..=i8::MAX {
      let real = q.dequantize(v);
      assert!(real > prev);
      prev = real;
    }
  }
}
