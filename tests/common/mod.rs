// 该文件是 Xunying （巡鹰） 项目的一部分。
// tests/common/mod.rs - 集成测试公共组件
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

#![allow(dead_code)]

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::Duration,
};

use xunying::{
  config::{PipelineConfig, RecoveryConfig},
  decode::QuantParam,
  detection::DetectionResultSet,
  model::{InferenceOutput, Model, RawHeadOutput},
  output::{FrameInfo, Render},
  tracker::Tracker,
};

pub const CLASS_COUNT: usize = 4;

/// 所有等待为零、取帧立即超时的配置
pub fn instant_config() -> PipelineConfig {
  let mut config = PipelineConfig::default();
  config.decode.class_count = CLASS_COUNT;
  config.recovery = RecoveryConfig {
    acquisition_timeout_ms: 0,
    ..RecoveryConfig::default()
  }
  .without_pauses();
  config
}

/// 第一个检测头 (0, 0) 单元、锚框 0 上有一个类别为 `class_id` 的目标
pub fn single_object_output(class_id: usize) -> InferenceOutput {
  let channels = 5 + CLASS_COUNT;
  let quant = QuantParam::new(0, 0.1);
  let head = |grid: usize, with_object: bool| {
    let plane = grid * grid;
    let mut data = vec![-100i8; plane * 3 * channels];
    if with_object {
      for c in 0..4 {
        data[c * plane] = 0;
      }
      data[4 * plane] = 100;
      data[(5 + class_id) * plane] = 90;
    }
    RawHeadOutput {
      data: data.into_boxed_slice(),
      grid_h: grid,
      grid_w: grid,
      quant,
    }
  };
  InferenceOutput {
    heads: [head(2, true), head(2, false), head(1, false)],
  }
}

#[derive(Debug, thiserror::Error)]
#[error("推理引擎故障")]
pub struct InferenceFault;

/// 统计调用次数的推理模型，可选择失败或延迟
#[derive(Clone)]
pub struct ScriptedModel {
  output: InferenceOutput,
  fail: bool,
  delay: Duration,
  pub calls: Arc<AtomicUsize>,
}

impl ScriptedModel {
  pub fn detecting(class_id: usize) -> Self {
    Self {
      output: single_object_output(class_id),
      fail: false,
      delay: Duration::ZERO,
      calls: Arc::default(),
    }
  }

  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::detecting(0)
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Model for ScriptedModel {
  type Error = InferenceFault;

  fn infer(&self, _input: &[u8], _width: u32, _height: u32) -> Result<InferenceOutput, Self::Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }
    if self.fail {
      return Err(InferenceFault);
    }
    Ok(self.output.clone())
  }
}

/// 按调用顺序分配跟踪号
#[derive(Clone, Default)]
pub struct CountingTracker {
  pub calls: Arc<AtomicUsize>,
}

impl Tracker for CountingTracker {
  type Error = std::convert::Infallible;

  fn update(&mut self, detections: &mut DetectionResultSet) -> Result<(), Self::Error> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
    for item in detections.iter_mut() {
      item.track_id = Some(call);
    }
    Ok(())
  }
}

#[derive(Clone, Default)]
pub struct RecordingOutput {
  pub frames: Arc<Mutex<Vec<(FrameInfo, DetectionResultSet)>>>,
}

impl RecordingOutput {
  pub fn frames(&self) -> Vec<(FrameInfo, DetectionResultSet)> {
    self.frames.lock().unwrap().clone()
  }
}

impl Render for RecordingOutput {
  type Error = std::convert::Infallible;

  fn render_result(&self, frame: &FrameInfo, result: &DetectionResultSet) -> Result<(), Self::Error> {
    self.frames.lock().unwrap().push((*frame, result.clone()));
    Ok(())
  }
}
