// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/source.rs - 硬件帧缓冲源
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

//! 硬件帧缓冲源抽象。
//!
//! 缓冲源遵循单消费者约定：同一时刻最多只有一个缓冲区被取出，
//! 并且在下一次取帧之前必须归还。[`CheckedOut`] 在所有退出路径上
//! 恰好归还一次。

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod scripted;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_source;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_source::{
  GStreamerFrame, GStreamerSource, GStreamerSourceBuilder, GStreamerSourceError,
};

/// 通道端点（设备号 + 通道号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelEndpoint {
  pub device: u32,
  pub channel: u32,
}

impl fmt::Display for ChannelEndpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}", self.device, self.channel)
  }
}

/// 生产者 → 流水线的绑定关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineChannel {
  pub producer: ChannelEndpoint,
  pub consumer: ChannelEndpoint,
}

impl fmt::Display for PipelineChannel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "producer{} -> consumer{}", self.producer, self.consumer)
  }
}

pub trait FrameBuffer {
  /// `None` 表示空缓冲区
  fn data(&self) -> Option<&[u8]>;
  fn width(&self) -> u32;
  fn height(&self) -> u32;
}

/// 硬件帧缓冲源，所有操作同步执行并返回成功或失败
///
/// 方法只需要 `&self`，便于停止流程时从其他线程调用 `stop_flow`。
pub trait BufferSource {
  type Buffer: FrameBuffer;
  type Error: std::error::Error + Send + Sync + 'static;

  /// 最多阻塞 `timeout`，超时或其他故障均返回错误
  fn acquire(&self, channel: &PipelineChannel, timeout: Duration) -> Result<Self::Buffer, Self::Error>;
  fn release(&self, buffer: Self::Buffer) -> Result<(), Self::Error>;
  fn start_flow(&self, channel: &PipelineChannel) -> Result<(), Self::Error>;
  fn stop_flow(&self, channel: &PipelineChannel) -> Result<(), Self::Error>;
  fn unbind(&self, channel: &PipelineChannel) -> Result<(), Self::Error>;
  fn bind(&self, channel: &PipelineChannel) -> Result<(), Self::Error>;
}

/// 已取出的缓冲区，析构时自动归还
pub struct CheckedOut<'a, S: BufferSource> {
  source: &'a S,
  buffer: Option<S::Buffer>,
}

impl<'a, S: BufferSource> CheckedOut<'a, S> {
  pub fn new(source: &'a S, buffer: S::Buffer) -> Self {
    Self {
      source,
      buffer: Some(buffer),
    }
  }

  /// 非空且尺寸有效时返回 (数据, 宽, 高)
  pub fn frame(&self) -> Option<(&[u8], u32, u32)> {
    let buffer = self.buffer.as_ref()?;
    let data = buffer.data()?;
    if data.is_empty() || buffer.width() == 0 || buffer.height() == 0 {
      return None;
    }
    Some((data, buffer.width(), buffer.height()))
  }

  pub fn release(mut self) -> Result<(), S::Error> {
    match self.buffer.take() {
      Some(buffer) => self.source.release(buffer),
      None => Ok(()),
    }
  }
}

impl<S: BufferSource> Drop for CheckedOut<'_, S> {
  fn drop(&mut self) {
    if let Some(buffer) = self.buffer.take() {
      if let Err(e) = self.source.release(buffer) {
        warn!("归还缓冲区失败: {}", e);
      }
    }
  }
}
