// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/config.rs - 运行时配置
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

//! 流水线运行时配置。
//!
//! 所有配置都可以从 JSON 文件加载（缺省字段取默认值），再由命令行参数覆盖。

use std::{fmt, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{detection::ConfidenceScale, source::PipelineChannel};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("未知的解码策略: {0}")]
  UnknownPolicy(String),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 解码与抑制策略
///
/// 两种策略来自两代部署，行为差异包括置信度量纲、是否跨类抑制以及截断顺序，
/// 必须显式选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
  /// 策略 A：仅用 objectness 打分，全局 NMS，按扫描顺序决胜，置信度为百分比
  #[default]
  ObjectnessGlobal,
  /// 策略 B：类别分数与 objectness 联合打分，按类 NMS，按分数决胜，置信度为概率
  JointPerClass,
}

impl DecodePolicy {
  pub fn confidence_scale(self) -> ConfidenceScale {
    match self {
      DecodePolicy::ObjectnessGlobal => ConfidenceScale::Percent,
      DecodePolicy::JointPerClass => ConfidenceScale::Probability,
    }
  }
}

impl FromStr for DecodePolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "a" | "objectness" | "objectness_global" => Ok(DecodePolicy::ObjectnessGlobal),
      "b" | "joint" | "joint_per_class" => Ok(DecodePolicy::JointPerClass),
      _ => Err(ConfigError::UnknownPolicy(s.to_string())),
    }
  }
}

impl fmt::Display for DecodePolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DecodePolicy::ObjectnessGlobal => write!(f, "objectness"),
      DecodePolicy::JointPerClass => write!(f, "joint"),
    }
  }
}

/// 每个检测头的三组 (宽, 高) 先验框
pub type AnchorSet = [[u32; 2]; 3];

/// 单个检测头的步长与先验框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadSpec {
  pub stride: u32,
  pub anchors: AnchorSet,
}

pub const DEFAULT_HEADS: [HeadSpec; 3] = [
  HeadSpec {
    stride: 8,
    anchors: [[10, 13], [16, 30], [33, 23]],
  },
  HeadSpec {
    stride: 16,
    anchors: [[30, 61], [62, 45], [59, 119]],
  },
  HeadSpec {
    stride: 32,
    anchors: [[116, 90], [156, 198], [373, 326]],
  },
];

/// 预处理时加入的 letterbox 填充（模型输入空间像素）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Letterbox {
  pub x_pad: f32,
  pub y_pad: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
  pub policy: DecodePolicy,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  /// 仅策略 A 使用：映射坐标前的最终分数过滤
  pub visualization_threshold: f32,
  pub class_count: usize,
  pub model_input_width: u32,
  pub model_input_height: u32,
  /// 仅策略 B 使用
  pub letterbox: Option<Letterbox>,
  pub heads: [HeadSpec; 3],
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      policy: DecodePolicy::default(),
      confidence_threshold: 0.25,
      nms_threshold: 0.45,
      visualization_threshold: 0.25,
      class_count: 80,
      model_input_width: 640,
      model_input_height: 640,
      letterbox: None,
      heads: DEFAULT_HEADS,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
  /// 连续失败达到该值时执行软恢复
  pub restart_threshold: u32,
  /// 连续失败超过该值时终止采集循环
  pub stop_threshold: u32,
  pub acquisition_timeout_ms: u64,
  pub retry_backoff_ms: u64,
  pub soft_restart_pause_ms: u64,
  pub hard_unbind_pause_ms: u64,
  pub hard_rebind_pause_ms: u64,
}

impl Default for RecoveryConfig {
  fn default() -> Self {
    Self {
      restart_threshold: 4,
      stop_threshold: 50,
      acquisition_timeout_ms: 1000,
      retry_backoff_ms: 50,
      soft_restart_pause_ms: 200,
      hard_unbind_pause_ms: 500,
      hard_rebind_pause_ms: 200,
    }
  }
}

impl RecoveryConfig {
  /// 所有等待时间为零的配置，用于仿真
  pub fn without_pauses(mut self) -> Self {
    self.retry_backoff_ms = 0;
    self.soft_restart_pause_ms = 0;
    self.hard_unbind_pause_ms = 0;
    self.hard_rebind_pause_ms = 0;
    self
  }

  pub fn hard_recovery_threshold(&self) -> u32 {
    self.restart_threshold.saturating_mul(3)
  }

  pub fn acquisition_timeout(&self) -> Duration {
    Duration::from_millis(self.acquisition_timeout_ms)
  }

  pub fn retry_backoff(&self) -> Duration {
    Duration::from_millis(self.retry_backoff_ms)
  }

  pub fn soft_restart_pause(&self) -> Duration {
    Duration::from_millis(self.soft_restart_pause_ms)
  }

  pub fn hard_unbind_pause(&self) -> Duration {
    Duration::from_millis(self.hard_unbind_pause_ms)
  }

  pub fn hard_rebind_pause(&self) -> Duration {
    Duration::from_millis(self.hard_rebind_pause_ms)
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub decode: DecodeConfig,
  pub recovery: RecoveryConfig,
  pub channel: PipelineChannel,
}

impl PipelineConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let config = Self::parse_json_file(path)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
    let config = Self::parse_json_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// 只解析不校验，供调用方先应用覆盖项
  pub fn parse_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::parse_json_str(&content)
  }

  pub fn parse_json_str(content: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(content)?)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let decode = &self.decode;
    for (name, value) in [
      ("confidence_threshold", decode.confidence_threshold),
      ("nms_threshold", decode.nms_threshold),
      ("visualization_threshold", decode.visualization_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
          "{} 必须位于 [0, 1]，实际为 {}",
          name, value
        )));
      }
    }
    if decode.class_count == 0 {
      return Err(ConfigError::Invalid("class_count 不能为 0".to_string()));
    }
    if decode.model_input_width == 0 || decode.model_input_height == 0 {
      return Err(ConfigError::Invalid(format!(
        "模型输入尺寸无效: {}x{}",
        decode.model_input_width, decode.model_input_height
      )));
    }
    if decode.heads.iter().any(|head| head.stride == 0) {
      return Err(ConfigError::Invalid("检测头步长不能为 0".to_string()));
    }

    let recovery = &self.recovery;
    if recovery.restart_threshold == 0 {
      return Err(ConfigError::Invalid(
        "restart_threshold 不能为 0".to_string(),
      ));
    }
    if recovery.stop_threshold < recovery.hard_recovery_threshold() {
      return Err(ConfigError::Invalid(format!(
        "stop_threshold ({}) 小于硬恢复阈值 ({})，硬恢复永远无法触发",
        recovery.stop_threshold,
        recovery.hard_recovery_threshold()
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = PipelineConfig::default();
    config.validate().unwrap();
    assert_eq!(config.recovery.restart_threshold, 4);
    assert_eq!(config.recovery.stop_threshold, 50);
    assert_eq!(config.recovery.acquisition_timeout_ms, 1000);
    assert_eq!(config.recovery.hard_recovery_threshold(), 12);
    assert_eq!(config.decode.heads[2].stride, 32);
  }

  #[test]
  fn partial_json_keeps_defaults() {
    let config = PipelineConfig::from_json_str(
      r#"{ "decode": { "policy": "joint_per_class", "nms_threshold": 0.6 },
           "recovery": { "restart_threshold": 2 } }"#,
    )
    .unwrap();
    assert_eq!(config.decode.policy, DecodePolicy::JointPerClass);
    assert_eq!(config.decode.nms_threshold, 0.6);
    assert_eq!(config.decode.class_count, 80);
    assert_eq!(config.recovery.restart_threshold, 2);
    assert_eq!(config.recovery.stop_threshold, 50);
  }

  #[test]
  fn rejects_unreachable_hard_recovery() {
    let mut config = PipelineConfig::default();
    config.recovery.restart_threshold = 20;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn rejects_out_of_range_threshold() {
    let mut config = PipelineConfig::default();
    config.decode.confidence_threshold = 1.5;
    assert!(config.validate().is_err());
  }

  #[test]
  fn policy_from_str() {
    assert_eq!("a".parse::<DecodePolicy>().unwrap(), DecodePolicy::ObjectnessGlobal);
    assert_eq!("Joint".parse::<DecodePolicy>().unwrap(), DecodePolicy::JointPerClass);
    assert!("soft".parse::<DecodePolicy>().is_err());
  }
}
