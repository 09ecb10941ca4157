// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Args;

use crate::config::{ConfigError, DecodePolicy, PipelineConfig};

/// 解码与恢复相关的公共参数，覆盖配置文件中的对应项
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 解码策略: objectness (a) 或 joint (b)
  #[arg(long, value_name = "POLICY")]
  pub policy: Option<DecodePolicy>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 显示阈值 (0.0 - 1.0)，仅 objectness 策略使用
  #[arg(long, value_name = "THRESHOLD")]
  pub visualization_threshold: Option<f32>,

  /// 类别数量
  #[arg(long, value_name = "COUNT")]
  pub class_count: Option<usize>,

  /// 取帧超时（毫秒）
  #[arg(long, value_name = "MS")]
  pub acquisition_timeout_ms: Option<u64>,
}

impl PipelineArgs {
  /// 读取配置文件（如有），应用命令行覆盖后统一校验
  pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::parse_json_file(path)?,
      None => PipelineConfig::default(),
    };
    self.apply(&mut config);
    config.validate()?;
    Ok(config)
  }

  pub fn apply(&self, config: &mut PipelineConfig) {
    let decode = &mut config.decode;
    if let Some(policy) = self.policy {
      decode.policy = policy;
    }
    if let Some(confidence) = self.confidence {
      decode.confidence_threshold = confidence;
    }
    if let Some(nms) = self.nms_threshold {
      decode.nms_threshold = nms;
    }
    if let Some(vis) = self.visualization_threshold {
      decode.visualization_threshold = vis;
    }
    if let Some(count) = self.class_count {
      decode.class_count = count;
    }
    if let Some(timeout) = self.acquisition_timeout_ms {
      config.recovery.acquisition_timeout_ms = timeout;
    }
  }
}
