// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionResultSet,
  output::{FrameInfo, Render},
};

/// 通过 tracing 输出每一个检测结果
#[derive(Debug, Default, Clone)]
pub struct LogOutput {
  target: String,
}

impl LogOutput {
  pub fn target(&self) -> &str {
    &self.target
  }
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(LogOutput {
      target: url.host_str().unwrap_or("detections").to_string(),
    })
  }
}

impl Render for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &FrameInfo, result: &DetectionResultSet) -> Result<(), Self::Error> {
    info!(
      "[{}] 第 {} 帧 ({}x{}): {} 个目标",
      self.target,
      frame.index,
      frame.width,
      frame.height,
      result.len()
    );
    for item in result {
      let b = &item.bbox;
      info!(
        "[{}]   类别 {} 置信度 {:.2} 跟踪 {:?} 框 ({}, {}, {}, {})",
        self.target, item.class_id, item.confidence, item.track_id, b.left, b.top, b.right, b.bottom
      );
    }
    Ok(())
  }
}
