// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/source/gstreamer_source.rs - GStreamer 缓冲源
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

//! # GStreamer 缓冲源
//!
//! 以 appsink 作为消费端的 GStreamer 管道，映射到 [`BufferSource`] 约定：
//!
//! - `acquire`：`try_pull_sample`，超时返回 [`GStreamerSourceError::Timeout`]
//! - `stop_flow` / `start_flow`：管道切换到 `Paused` / `Playing`
//! - `unbind` / `bind`：断开 / 重连生产者与消费者元素
//!
//! 管道形如：
//!
//! ```text
//! v4l2src ... ! identity name=producer0_0 ! queue name=consumer0_0 ! videoconvert
//!   ! video/x-raw,format=RGB ! appsink name=sink max-buffers=2 drop=true
//! ```
//!
//! ## URL
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=15&io-mode=2&rotate=90`
//! - `gst://file/path/to/video.mp4?rotate=180`

use std::{collections::HashMap, time::Duration};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{BufferSource, FrameBuffer, PipelineChannel};
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;

#[derive(Error, Debug)]
pub enum GStreamerSourceError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("未知的 GStreamer 源类型: {0}")]
  UnknownSourceKind(String),
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("找不到管道元素: {0}")]
  ElementNotFound(String),
  #[error("取帧超时")]
  Timeout,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

enum GStreamerSourceItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  AspectRatio {
    ratio: (u32, u32),
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerSourceItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerSourceItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerSourceItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerSourceItem::AspectRatio { ratio } => {
        format!("aspectratiocrop aspect-ratio={}/{}", ratio.0, ratio.1)
      }
      GStreamerSourceItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<Self> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => (0, 0),
    };
    Some(GStreamerSourceItem::VideoFlip { method, direction })
  }
}

fn producer_name(channel: &PipelineChannel) -> String {
  format!("producer{}", channel.producer)
}

fn consumer_name(channel: &PipelineChannel) -> String {
  format!("consumer{}", channel.consumer)
}

fn query_u32(query: &HashMap<String, String>, key: &str) -> Option<u32> {
  query.get(key).and_then(|v| v.parse::<u32>().ok())
}

/// GStreamer 缓冲源构建器
pub struct GStreamerSourceBuilder {
  items: Vec<GStreamerSourceItem>,
  channel: PipelineChannel,
}

impl GStreamerSourceBuilder {
  fn camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let width = query_u32(query, "width").unwrap_or(DEFAULT_WIDTH);
    let height = query_u32(query, "height").unwrap_or(DEFAULT_HEIGHT);
    let mut items = vec![
      GStreamerSourceItem::CameraSource {
        camera: path.to_string(),
        io_mode: query_u32(query, "io-mode"),
        format: query.get("format").cloned().unwrap_or_else(|| "YUY2".to_string()),
        width,
        height,
        fps: query_u32(query, "fps").unwrap_or(DEFAULT_FPS),
      },
      GStreamerSourceItem::AspectRatio {
        ratio: (width, height),
      },
    ];
    items.extend(GStreamerSourceItem::video_flip(query.get("rotate").map(String::as_str)));
    Self {
      items,
      channel: PipelineChannel::default(),
    }
  }

  fn file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerSourceItem::FileSource(path.to_string())];
    if let (Some(width), Some(height)) = (query_u32(query, "width"), query_u32(query, "height")) {
      items.push(GStreamerSourceItem::AspectRatio {
        ratio: (width, height),
      });
    }
    items.extend(GStreamerSourceItem::video_flip(query.get("rotate").map(String::as_str)));
    Self {
      items,
      channel: PipelineChannel::default(),
    }
  }

  pub fn with_channel(mut self, channel: PipelineChannel) -> Self {
    self.channel = channel;
    self
  }

  pub fn description(&self) -> String {
    let upstream = self
      .items
      .iter()
      .map(GStreamerSourceItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! identity name={} ! queue name={} ! videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink",
      upstream,
      producer_name(&self.channel),
      consumer_name(&self.channel)
    )
  }

  /// 构建管道并置于 `Ready`，由 `start_flow` 启动数据流
  pub fn build(self) -> Result<GStreamerSource, GStreamerSourceError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerSourceError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerSourceError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerSourceError::AppSinkNotFound)?;

    pipeline.set_state(gst::State::Ready)?;

    Ok(GStreamerSource { pipeline, appsink })
  }
}

impl FromUrl for GStreamerSourceBuilder {
  type Error = GStreamerSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerSourceError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let path = urlencoding::decode(url.path())
      .map_err(|e| GStreamerSourceError::PipelineError(e.to_string()))?;

    match url.host_str() {
      Some("camera") => Ok(Self::camera_pipeline(&path, &query)),
      Some("file") => Ok(Self::file_pipeline(&path, &query)),
      other => Err(GStreamerSourceError::UnknownSourceKind(
        other.unwrap_or_default().to_string(),
      )),
    }
  }
}

impl FromUrlWithScheme for GStreamerSourceBuilder {
  const SCHEME: &'static str = "gst";
}

/// appsink 样本的只读映射
pub struct GStreamerFrame {
  map: gst::MappedBuffer<gst::buffer::Readable>,
  width: u32,
  height: u32,
}

impl FrameBuffer for GStreamerFrame {
  fn data(&self) -> Option<&[u8]> {
    Some(self.map.as_slice())
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }
}

pub struct GStreamerSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl GStreamerSource {
  fn element(&self, name: &str) -> Result<gst::Element, GStreamerSourceError> {
    self
      .pipeline
      .by_name(name)
      .ok_or_else(|| GStreamerSourceError::ElementNotFound(name.to_string()))
  }

  fn sample_to_frame(sample: gst::Sample) -> Result<GStreamerFrame, GStreamerSourceError> {
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerSourceError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerSourceError::VideoInfoError)?;
    let buffer = sample
      .buffer_owned()
      .ok_or_else(|| GStreamerSourceError::PipelineError("No buffer in sample".to_string()))?;
    let map = buffer.into_mapped_buffer_readable().map_err(|_| {
      GStreamerSourceError::PipelineError("Failed to map buffer for reading".to_string())
    })?;

    let expected = video_info.width() as usize * video_info.height() as usize * 3;
    if map.len() < expected {
      return Err(GStreamerSourceError::BufferSizeMismatch {
        expected,
        actual: map.len(),
      });
    }

    Ok(GStreamerFrame {
      map,
      width: video_info.width(),
      height: video_info.height(),
    })
  }
}

impl BufferSource for GStreamerSource {
  type Buffer = GStreamerFrame;
  type Error = GStreamerSourceError;

  fn acquire(&self, _channel: &PipelineChannel, timeout: Duration) -> Result<Self::Buffer, Self::Error> {
    let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
    let sample = self
      .appsink
      .try_pull_sample(timeout)
      .ok_or(GStreamerSourceError::Timeout)?;
    Self::sample_to_frame(sample)
  }

  fn release(&self, buffer: Self::Buffer) -> Result<(), Self::Error> {
    drop(buffer);
    Ok(())
  }

  fn start_flow(&self, channel: &PipelineChannel) -> Result<(), Self::Error> {
    debug!("启动数据流: {}", channel);
    self.pipeline.set_state(gst::State::Playing)?;
    Ok(())
  }

  fn stop_flow(&self, channel: &PipelineChannel) -> Result<(), Self::Error> {
    debug!("停止数据流: {}", channel);
    self.pipeline.set_state(gst::State::Paused)?;
    Ok(())
  }

  fn unbind(&self, channel: &PipelineChannel) -> Result<(), Self::Error> {
    let producer = self.element(&producer_name(channel))?;
    let consumer = self.element(&consumer_name(channel))?;
    self.pipeline.set_state(gst::State::Ready)?;
    producer.unlink(&consumer);
    Ok(())
  }

  fn bind(&self, channel: &PipelineChannel) -> Result<(), Self::Error> {
    let producer = self.element(&producer_name(channel))?;
    let consumer = self.element(&consumer_name(channel))?;
    let linked = producer
      .static_pad("src")
      .map(|pad| pad.is_linked())
      .unwrap_or(false);
    if !linked {
      producer.link(&consumer)?;
    }
    Ok(())
  }
}

impl Drop for GStreamerSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::ChannelEndpoint;

  #[test]
  fn camera_url_builds_named_channel_elements() {
    let url = Url::parse("gst://camera/dev/video0?width=320&height=240&fps=30&rotate=90").unwrap();
    let builder = GStreamerSourceBuilder::from_url(&url)
      .unwrap()
      .with_channel(PipelineChannel {
        producer: ChannelEndpoint { device: 0, channel: 1 },
        consumer: ChannelEndpoint { device: 2, channel: 0 },
      });
    let description = builder.description();
    assert!(description.starts_with("v4l2src device=/dev/video0 ! video/x-raw,format=YUY2,width=320,height=240,framerate=30/1"));
    assert!(description.contains("videoflip method=1 video-direction=1"));
    assert!(description.contains("identity name=producer0_1 ! queue name=consumer2_0"));
    assert!(description.ends_with("name=sink"));
  }

  #[test]
  fn file_url_without_size_skips_crop() {
    let url = Url::parse("gst://file/tmp/clip.mp4").unwrap();
    let description = GStreamerSourceBuilder::from_url(&url).unwrap().description();
    assert!(description.starts_with("filesrc location=/tmp/clip.mp4 ! decodebin ! identity"));
    assert!(!description.contains("aspectratiocrop"));
  }

  #[test]
  fn rejects_unknown_kind_and_scheme() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerSourceBuilder::from_url(&url),
      Err(GStreamerSourceError::UnknownSourceKind(_))
    ));
    let url = Url::parse("file:///tmp/clip.mp4").unwrap();
    assert!(matches!(
      GStreamerSourceBuilder::from_url(&url),
      Err(GStreamerSourceError::SchemeMismatch)
    ));
  }
}
